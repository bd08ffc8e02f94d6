//! Bootstrap: everything between building the app and running its
//! transports. Stages run strictly in order and the first failure aborts.

use std::sync::Arc;

use keel_core::{Attribute, ErrorApi, LoggerApi, ServiceKind};
use parking_lot::Mutex;

use super::{App, AppState};
use crate::api::ApiSet;
use crate::behavior::LoggerExtractor;
use crate::client::ClientConnection;
use crate::error::{AbortError, ClientError};
use crate::fields;
use crate::handler::{Roles, ServiceApi, ServiceHandler};
use crate::plugin::feature::LOGGER_EXTRACTOR_FEATURE_NAME;
use crate::plugin::{CanBeInitializedOptions, FeatureSet, ServiceOptions};

pub(crate) const DEFINITIONS_ERROR: &str = "service definitions error";
pub(crate) const FEATURES_ERROR: &str = "could not initialize features";
pub(crate) const SERVICES_ERROR: &str = "could not initialize internal services";
pub(crate) const CLIENTS_ERROR: &str = "could not establish connection with clients";
pub(crate) const LIFECYCLE_ERROR: &str = "failed while running lifecycle on_start";
pub(crate) const VALIDATION_ERROR: &str = "service server object is not properly initialized";

/// The service object behind `service`, which bootstrap fills in place.
fn exclusive<'a, S>(service: &'a mut Arc<S>, stage: &str) -> Result<&'a mut S, AbortError> {
    Arc::get_mut(service)
        .ok_or_else(|| AbortError::new(stage, anyhow::anyhow!("service object is shared during bootstrap")))
}

/// What lifecycle hooks see of the app.
struct Hooks<'a> {
    features: &'a FeatureSet,
    errors: &'a dyn ErrorApi,
    logger: &'a dyn LoggerApi,
    aborted: Mutex<Option<AbortError>>,
}

impl ServiceApi for Hooks<'_> {
    fn features(&self) -> &FeatureSet {
        self.features
    }

    fn errors(&self) -> &dyn ErrorApi {
        self.errors
    }

    fn logger(&self) -> &dyn LoggerApi {
        self.logger
    }

    fn abort(&self, message: &str, err: anyhow::Error) {
        let mut aborted = self.aborted.lock();
        if aborted.is_none() {
            *aborted = Some(AbortError::new(message, err));
        }
    }
}

impl App {
    /// Runs every bootstrap stage against `service`.
    ///
    /// `service` must not be shared yet: its fields are filled in place.
    /// Features already initialized are not cleaned up when a later stage
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns an [`AbortError`] carrying the message of the failed stage.
    /// The error is not logged here.
    pub async fn bootstrap<S: ServiceHandler>(&mut self, service: &mut Arc<S>) -> Result<(), AbortError> {
        self.state
            .transition(AppState::Bootstrapping)
            .map_err(|e| AbortError::new(DEFINITIONS_ERROR, e))?;
        self.logger.info("starting service", &self.service_attributes());

        self.load_definitions(exclusive(service, DEFINITIONS_ERROR)?)?;

        let can = CanBeInitializedOptions {
            deployment_env: self.context.deployment,
            definitions: &self.definitions,
        };
        self.features
            .initialize_all(&can, self.initialize_options())
            .await
            .map_err(|e| AbortError::new(FEATURES_ERROR, e))?;

        self.features
            .start_all(&**service)
            .await
            .map_err(|e| AbortError::new(FEATURES_ERROR, e))?;

        fields::inject_features(
            self.definitions.service_name(),
            &mut exclusive(service, FEATURES_ERROR)?.fields(),
            &self.features,
            self.errors.as_ref(),
        )
        .map_err(|e| AbortError::new(FEATURES_ERROR, e))?;

        if let Some(extractor) = self
            .features
            .framework_api::<dyn LoggerExtractor>(LOGGER_EXTRACTOR_FEATURE_NAME)
        {
            self.logger.set_extractor(extractor);
        }

        self.initialize_services(Roles::exposed_by(service)).await?;

        let test_mode = self.envs.is_test();
        if !test_mode {
            self.couple_clients(exclusive(service, CLIENTS_ERROR)?)
                .await
                .map_err(|e| AbortError::new(CLIENTS_ERROR, e))?;
        }

        if !test_mode || self.definitions.tests.execute_lifecycle {
            self.run_on_start(exclusive(service, LIFECYCLE_ERROR)?).await?;
        }

        if !test_mode {
            fields::validate(
                self.definitions.service_name(),
                &exclusive(service, VALIDATION_ERROR)?.fields(),
            )
            .map_err(|e| AbortError::new(VALIDATION_ERROR, e))?;
        }

        self.logger.info("service resources", &self.features.fields());
        Ok(())
    }

    fn load_definitions<S: ServiceHandler>(&mut self, service: &mut S) -> Result<(), AbortError> {
        let mut definitions = (*self.definitions).clone();

        for feature in self.features.iter() {
            if let Some(settings) = feature.settings() {
                let entry = settings
                    .definitions(&definitions)
                    .map_err(|e| AbortError::new(DEFINITIONS_ERROR, e))?;
                definitions.add_external_feature_definitions(feature.entry().name(), entry);
            }
        }
        for transport in self.services.iter() {
            if let Some(settings) = transport.settings() {
                let entry = settings
                    .definitions(&definitions)
                    .map_err(|e| AbortError::new(DEFINITIONS_ERROR, e))?;
                definitions.add_external_service_definitions(transport.name(), entry);
            }
        }

        fields::load_definitions(&mut service.fields(), &definitions)?;
        definitions.validate()?;

        self.definitions = Arc::new(definitions);
        Ok(())
    }

    fn default_port(&self, kind: &ServiceKind) -> u16 {
        if *kind == ServiceKind::GRPC {
            self.envs.grpc_port()
        } else if *kind == ServiceKind::HTTP || *kind == ServiceKind::HTTP_SPEC {
            self.envs.http_port()
        } else {
            0
        }
    }

    async fn initialize_services(&mut self, roles: Roles) -> Result<(), AbortError> {
        for (kind, port) in self.definitions.service_types() {
            let transport = self
                .services
                .get(kind.as_str())
                .map_err(|e| AbortError::new(SERVICES_ERROR, e))?;

            let service = self.service_options.get(kind.as_str()).cloned().unwrap_or_else(|| {
                self.logger.debug(
                    "no service options given, using empty ones",
                    &[Attribute::string("service.kind", kind.as_str())],
                );
                ApiSet::new()
            });

            let options = ServiceOptions {
                port: port.unwrap_or_else(|| self.default_port(&kind)),
                service_name: self.definitions.service_name().to_string(),
                product: self.definitions.product.clone(),
                logger: Arc::clone(&self.logger) as Arc<dyn LoggerApi>,
                errors: Arc::clone(&self.errors) as Arc<dyn ErrorApi>,
                service_context: Arc::clone(&self.context),
                tags: self.context.tags(),
                service,
                roles: roles.clone(),
                definitions: Arc::clone(&self.definitions),
                features: Arc::clone(&self.features),
                env: Arc::clone(&self.envs) as Arc<dyn keel_core::EnvApi>,
                kind,
            };

            transport
                .initialize(options)
                .await
                .map_err(|e| AbortError::new(SERVICES_ERROR, e))?;
            self.active.push(transport);
        }
        Ok(())
    }

    async fn couple_clients<S: ServiceHandler>(&self, service: &mut S) -> Result<(), ClientError> {
        let bindings: Vec<(usize, String)> = service
            .fields()
            .iter()
            .enumerate()
            .filter_map(|(index, field)| {
                let tag = field.tag.as_ref().filter(|tag| tag.is_client_tag())?;
                tag.grpc_client.clone().map(|binding| (index, binding))
            })
            .collect();

        for (index, binding) in bindings {
            let descriptor = self
                .clients
                .get(&binding)
                .ok_or_else(|| ClientError::NotFound(binding.clone()))?;
            descriptor.validate(&binding)?;

            let connection =
                ClientConnection::resolve(descriptor.service_name(), &self.envs, &self.definitions);
            self.connector
                .connect(&connection)
                .await
                .map_err(|source| ClientError::Connection {
                    client: binding.clone(),
                    source,
                })?;

            let mut fields = service.fields();
            let Some(field) = fields.get_mut(index) else {
                continue;
            };
            let name = field.name;
            let slot = field
                .slot
                .as_client()
                .ok_or_else(|| ClientError::NotAClientField(name.to_string()))?;
            slot.bind(&binding, descriptor.as_ref(), connection)?;

            self.logger.debug(
                "client coupled",
                &[
                    Attribute::string("client.binding", binding.clone()),
                    Attribute::string("client.service", descriptor.service_name().to_string()),
                ],
            );
        }
        Ok(())
    }

    async fn run_on_start<S: ServiceHandler>(&self, service: &mut S) -> Result<(), AbortError> {
        let hooks = Hooks {
            features: &self.features,
            errors: self.errors.as_ref(),
            logger: self.logger.as_ref(),
            aborted: Mutex::new(None),
        };

        service
            .on_start(&hooks)
            .await
            .map_err(|e| AbortError::new(LIFECYCLE_ERROR, e))?;

        match hooks.aborted.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
