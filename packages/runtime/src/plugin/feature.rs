use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::definition::ExternalFeatureEntry;
use keel_core::{
    Attribute, Definitions, EnvApi, ErrorApi, LoggerApi, ServiceDeploy, ServiceError,
};
use parking_lot::RwLock;

use crate::api::ApiSet;
use crate::context::ServiceContext;
use crate::testing::Testing;

/// Prefix of every feature name the framework reserves.
pub const FEATURE_NAME_PREFIX: &str = "keel-";

pub const HTTP_FEATURE_NAME: &str = "keel-http";
pub const LOGGER_FEATURE_NAME: &str = "keel-logger";
pub const ERRORS_FEATURE_NAME: &str = "keel-errors";
pub const DEFINITION_FEATURE_NAME: &str = "keel-definition";
pub const ENV_FEATURE_NAME: &str = "keel-env";
pub const HTTP_CORS_FEATURE_NAME: &str = "keel-http_cors";
pub const TRACKER_FEATURE_NAME: &str = "keel-tracker";
pub const LOGGER_EXTRACTOR_FEATURE_NAME: &str = "keel-logger_extractor";
pub const TRACING_FEATURE_NAME: &str = "keel-tracing";
pub const HTTP_AUTH_FEATURE_NAME: &str = "keel-http_auth";
pub const PANIC_RECOVERY_FEATURE_NAME: &str = "keel-panic_recovery";

// ---------------------------------------------------------------------------
// Feature trait
// ---------------------------------------------------------------------------

/// A pluggable capability.
///
/// Features are registered into a [`FeatureSet`](super::FeatureSet) before the
/// service starts. During bootstrap each one is asked whether it applies to
/// the service, and eligible ones are initialized in registration order.
/// Optional extensions are discovered through the methods returning
/// `Option`.
#[async_trait]
pub trait Feature: Send + Sync + Any {
    /// Name, enabled state, and the collaborators handed over by the registry.
    fn entry(&self) -> &FeatureEntry;

    /// Whether the feature applies to this service.
    fn can_be_initialized(&self, options: &CanBeInitializedOptions<'_>) -> bool;

    async fn initialize(&self, options: &InitializeOptions) -> anyhow::Result<()>;

    /// Attributes describing the feature in the startup summary.
    fn fields(&self) -> Vec<Attribute>;

    /// Interfaces offered to service code. When `None`, the feature's own
    /// type is what service code can resolve.
    fn service_api(&self) -> Option<ApiSet> {
        None
    }

    /// Interfaces offered to the framework itself, such as the request
    /// tracker or the logger extractor.
    fn framework_api(&self) -> Option<ApiSet> {
        None
    }

    fn controller(&self) -> Option<&dyn FeatureController> {
        None
    }

    fn settings(&self) -> Option<&dyn FeatureSettings> {
        None
    }

    fn tester(&self) -> Option<&dyn FeatureTester> {
        None
    }
}

/// Features that hold resources between service start and shutdown.
#[async_trait]
pub trait FeatureController: Send + Sync {
    /// Called once after every feature is initialized, with the service
    /// object.
    async fn start(&self, service: &(dyn Any + Send + Sync)) -> anyhow::Result<()>;

    /// Called once during shutdown.
    async fn cleanup(&self) -> anyhow::Result<()>;
}

/// Features that own a settings block in the service definitions.
pub trait FeatureSettings: Send + Sync {
    /// Loads the feature's block from `definitions`.
    ///
    /// # Errors
    ///
    /// Returns an error if the block cannot be decoded.
    fn definitions(&self, definitions: &Definitions) -> anyhow::Result<Arc<dyn ExternalFeatureEntry>>;
}

/// Features that replace themselves with test doubles.
#[async_trait]
pub trait FeatureTester: Send + Sync {
    async fn setup(&self, t: &Testing);

    async fn teardown(&self, t: &Testing);

    /// Runs feature-specific checks against the service.
    async fn do_test(&self, t: &Testing, service_name: &str) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

pub struct CanBeInitializedOptions<'a> {
    pub deployment_env: ServiceDeploy,
    pub definitions: &'a Definitions,
}

/// Shared context handed to every eligible feature.
#[derive(Clone)]
pub struct InitializeOptions {
    pub logger: Arc<dyn LoggerApi>,
    pub errors: Arc<dyn ErrorApi>,
    pub env: Arc<dyn EnvApi>,
    pub definitions: Arc<Definitions>,
    pub tags: HashMap<String, String>,
    pub service_context: Arc<ServiceContext>,
    /// Every registered feature, by name.
    pub dependencies: HashMap<String, Arc<dyn Feature>>,
    /// Values supplied by the application when building the service.
    pub runtime_features: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

// ---------------------------------------------------------------------------
// FeatureEntry
// ---------------------------------------------------------------------------

/// State every feature embeds and exposes through [`Feature::entry`].
pub struct FeatureEntry {
    name: RwLock<String>,
    enabled: AtomicBool,
    logger: RwLock<Option<Arc<dyn LoggerApi>>>,
    errors: RwLock<Option<Arc<dyn ErrorApi>>>,
}

/// What the registry records on a feature once eligibility is known.
#[derive(Clone, Default)]
pub struct UpdateInfo {
    pub enabled: bool,
    pub name: Option<String>,
    pub logger: Option<Arc<dyn LoggerApi>>,
    pub errors: Option<Arc<dyn ErrorApi>>,
}

impl FeatureEntry {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: RwLock::new(name.into()),
            enabled: AtomicBool::new(false),
            logger: RwLock::new(None),
            errors: RwLock::new(None),
        }
    }

    pub fn update_info(&self, info: UpdateInfo) {
        if let Some(name) = info.name.filter(|n| !n.is_empty()) {
            *self.name.write() = name;
        }
        if let Some(logger) = info.logger {
            *self.logger.write() = Some(logger);
        }
        if let Some(errors) = info.errors {
            *self.errors.write() = Some(errors);
        }
        self.enabled.store(info.enabled, Ordering::Release);
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn logger(&self) -> Option<Arc<dyn LoggerApi>> {
        self.logger.read().clone()
    }

    /// An error prefixed with the feature name.
    pub fn error(&self, msg: impl fmt::Display) -> anyhow::Error {
        anyhow::anyhow!("{}: {msg}", self.name())
    }

    /// Submits `err` as an internal error tagged with the feature name.
    ///
    /// Without an error factory (before the registry handed one over) the
    /// error is built without being logged.
    pub fn wrap_error(&self, err: &dyn fmt::Display) -> ServiceError {
        let attrs = [Attribute::string("feature.name", self.name())];
        match self.errors.read().as_ref() {
            Some(errors) => errors.internal(err).with_attributes(attrs).submit(),
            None => keel_core::ErrorFactory::silent(self.name())
                .internal(err)
                .with_attributes(attrs)
                .submit(),
        }
    }
}

impl fmt::Debug for FeatureEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureEntry")
            .field("name", &*self.name.read())
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}
