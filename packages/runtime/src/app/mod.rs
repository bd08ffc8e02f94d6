//! The service application.
//!
//! [`App`] owns the feature and transport registries and drives one
//! service object through bootstrap, run and shutdown.

mod bootstrap;
mod run;
pub mod state;

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use clap::Parser;
use keel_core::{
    Attribute, Definitions, EnvApi, ErrorApi, ErrorFactory, LoggerApi, ProcessEnv, ServiceEnvs,
    ServiceKind, VarSource,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::api::ApiSet;
use crate::client::{ClientConnector, ClientDescriptor, GrpcClient, LazyConnector};
use crate::context::ServiceContext;
use crate::error::AbortError;
use crate::features;
use crate::logger::{init_subscriber, Logger};
use crate::plugin::{FeatureSet, InitializeOptions, Service, ServiceSet};
use crate::services;
use crate::testing::{ServiceTesting, TestOptions};

pub use state::{AppState, StateCell, TransitionError};

/// Definitions file used when neither the builder nor `--config` names one.
pub const DEFAULT_DEFINITIONS_PATH: &str = "service.toml";

pub(crate) type ShutdownSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Parser)]
#[command(ignore_errors = true)]
struct Args {
    /// Path to the service definitions file.
    #[arg(long)]
    config: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// AppBuilder
// ---------------------------------------------------------------------------

pub struct AppBuilder {
    definitions_path: Option<PathBuf>,
    definitions: Option<Definitions>,
    var_source: Arc<dyn VarSource>,
    features: FeatureSet,
    services: ServiceSet,
    service_options: HashMap<String, ApiSet>,
    clients: HashMap<String, Arc<dyn ClientDescriptor>>,
    runtime_features: HashMap<String, Arc<dyn Any + Send + Sync>>,
    connector: Arc<dyn ClientConnector>,
    shutdown_signal: Option<ShutdownSignal>,
    text_logs: bool,
}

impl AppBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            definitions_path: None,
            definitions: None,
            var_source: Arc::new(ProcessEnv),
            features: FeatureSet::new(),
            services: ServiceSet::new(),
            service_options: HashMap::new(),
            clients: HashMap::new(),
            runtime_features: HashMap::new(),
            connector: Arc::new(LazyConnector),
            shutdown_signal: None,
            text_logs: false,
        }
    }

    /// Reads definitions from `path` instead of `--config` or
    /// `./service.toml`.
    #[must_use]
    pub fn definitions_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.definitions_path = Some(path.into());
        self
    }

    /// Uses already decoded definitions.
    #[must_use]
    pub fn definitions(mut self, definitions: Definitions) -> Self {
        self.definitions = Some(definitions);
        self
    }

    /// Where environment values are read from. Defaults to the process
    /// environment.
    #[must_use]
    pub fn var_source(mut self, source: impl VarSource + 'static) -> Self {
        self.var_source = Arc::new(source);
        self
    }

    /// Adds features after the built-in ones. Names already taken are
    /// ignored.
    #[must_use]
    pub fn with_features(self, features: &FeatureSet) -> Self {
        self.features.append(features);
        self
    }

    /// Adds transports and makes their kinds declarable.
    #[must_use]
    pub fn with_services(self, services: &ServiceSet) -> Self {
        self.services.append(services);
        self
    }

    /// Options handed to the transport of `kind` on initialization.
    #[must_use]
    pub fn service_options(mut self, kind: &ServiceKind, options: ApiSet) -> Self {
        self.service_options.insert(kind.as_str().to_string(), options);
        self
    }

    /// Registers the client descriptor fields annotated with
    /// `grpc_client=<binding>` are coupled to.
    #[must_use]
    pub fn grpc_client<T: 'static>(mut self, binding: impl Into<String>, client: GrpcClient<T>) -> Self {
        self.clients.insert(binding.into(), Arc::new(client));
        self
    }

    /// A value features find in [`InitializeOptions::runtime_features`].
    #[must_use]
    pub fn runtime_feature(mut self, name: impl Into<String>, value: Arc<dyn Any + Send + Sync>) -> Self {
        self.runtime_features.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn client_connector(mut self, connector: impl ClientConnector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Replaces SIGINT/SIGTERM as the trigger of a graceful shutdown.
    #[must_use]
    pub fn shutdown_signal(mut self, signal: impl Future<Output = ()> + Send + 'static) -> Self {
        self.shutdown_signal = Some(Box::pin(signal));
        self
    }

    /// Human readable log lines instead of JSON.
    #[must_use]
    pub fn text_logs(mut self, enabled: bool) -> Self {
        self.text_logs = enabled;
        self
    }

    fn resolve_definitions(&mut self) -> Result<Definitions, AbortError> {
        if let Some(definitions) = self.definitions.take() {
            return Ok(definitions);
        }
        let path = self
            .definitions_path
            .take()
            .or_else(|| Args::try_parse().ok().and_then(|args| args.config))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DEFINITIONS_PATH));
        Ok(Definitions::from_file(path)?)
    }

    /// Loads definitions and environment and sets up logging.
    ///
    /// # Errors
    ///
    /// Returns an [`AbortError`] if the definitions cannot be read, a
    /// mandatory environment variable is missing, or the `[log]` block is
    /// invalid.
    pub fn build(mut self) -> Result<App, AbortError> {
        let mut definitions = self.resolve_definitions()?;
        for kind in self.services.kinds() {
            definitions.add_supported_service_type(kind);
        }

        let envs = ServiceEnvs::load(&definitions, self.var_source.as_ref())?;
        let context = ServiceContext::new(&definitions, envs.deployment_env());

        init_subscriber(!self.text_logs);
        let logger = Arc::new(Logger::from_definitions(&definitions, &context)?);
        let errors = Arc::new(ErrorFactory::new(
            definitions.service_name(),
            Arc::clone(&logger) as Arc<dyn LoggerApi>,
        ));

        let features = features::builtin();
        features.append(&self.features);
        let services = services::builtin();
        services.append(&self.services);

        Ok(App {
            definitions: Arc::new(definitions),
            envs: Arc::new(envs),
            logger,
            errors,
            context: Arc::new(context),
            features: Arc::new(features),
            services: Arc::new(services),
            service_options: self.service_options,
            clients: self.clients,
            runtime_features: self.runtime_features,
            connector: self.connector,
            shutdown_signal: Mutex::new(self.shutdown_signal),
            pending: Mutex::new(None),
            state: StateCell::new(),
            active: Vec::new(),
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct App {
    definitions: Arc<Definitions>,
    envs: Arc<ServiceEnvs>,
    logger: Arc<Logger>,
    errors: Arc<ErrorFactory>,
    context: Arc<ServiceContext>,
    features: Arc<FeatureSet>,
    services: Arc<ServiceSet>,
    service_options: HashMap<String, ApiSet>,
    clients: HashMap<String, Arc<dyn ClientDescriptor>>,
    runtime_features: HashMap<String, Arc<dyn Any + Send + Sync>>,
    connector: Arc<dyn ClientConnector>,
    shutdown_signal: Mutex<Option<ShutdownSignal>>,
    /// Failures of transports still running when the run ended.
    pending: Mutex<Option<mpsc::Receiver<AbortError>>>,
    state: StateCell,
    /// Transports initialized during bootstrap, in declaration order.
    active: Vec<Arc<dyn Service>>,
}

impl App {
    #[must_use]
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    #[must_use]
    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    #[must_use]
    pub fn logger(&self) -> Arc<dyn LoggerApi> {
        Arc::clone(&self.logger) as Arc<dyn LoggerApi>
    }

    #[must_use]
    pub fn errors(&self) -> &dyn ErrorApi {
        self.errors.as_ref()
    }

    #[must_use]
    pub fn env(&self) -> &ServiceEnvs {
        &self.envs
    }

    #[must_use]
    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    #[must_use]
    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    #[must_use]
    pub fn services(&self) -> &ServiceSet {
        &self.services
    }

    #[must_use]
    pub fn state(&self) -> AppState {
        self.state.get()
    }

    /// Names of the transports initialized so far.
    #[must_use]
    pub fn active_services(&self) -> Vec<String> {
        self.active.iter().map(|s| s.name().to_string()).collect()
    }

    /// Logs `message` at fatal severity and marks the run as aborted.
    pub fn abort(&self, message: &str, err: impl Into<anyhow::Error>) -> AbortError {
        self.fail(AbortError::new(message, err))
    }

    /// Prepares feature test resources for a test run.
    pub async fn setup_test(&self, options: &TestOptions) -> ServiceTesting {
        ServiceTesting::setup(
            options,
            &self.features,
            self.definitions.service_name(),
            self.logger(),
        )
        .await
    }

    fn fail(&self, err: AbortError) -> AbortError {
        self.logger.fatal(&err.message, &err.attributes());
        if let Err(e) = self.state.transition(AppState::Aborted) {
            tracing::debug!(error = %e, "abort outside bootstrap or run");
        }
        err
    }

    fn initialize_options(&self) -> InitializeOptions {
        InitializeOptions {
            logger: Arc::clone(&self.logger) as Arc<dyn LoggerApi>,
            errors: Arc::clone(&self.errors) as Arc<dyn ErrorApi>,
            env: Arc::clone(&self.envs) as Arc<dyn EnvApi>,
            definitions: Arc::clone(&self.definitions),
            tags: self.context.tags(),
            service_context: Arc::clone(&self.context),
            dependencies: self.features.dependencies(),
            runtime_features: self.runtime_features.clone(),
        }
    }

    fn service_attributes(&self) -> Vec<Attribute> {
        vec![
            Attribute::string("service.kinds", self.definitions.service_types_as_string()),
            Attribute::string("service.state", self.state.get().as_str()),
        ]
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("service", &self.definitions.service_name())
            .field("state", &self.state.get())
            .field("features", &self.features.names())
            .field("services", &self.services.kinds())
            .field("active", &self.active_services())
            .finish_non_exhaustive()
    }
}
