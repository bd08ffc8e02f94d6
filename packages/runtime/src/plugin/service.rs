use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::definition::ExternalServiceEntry;
use keel_core::{Attribute, Definitions, EnvApi, ErrorApi, LoggerApi, ServiceKind};

use super::FeatureSet;
use crate::api::ApiSet;
use crate::context::ServiceContext;
use crate::handler::{Roles, ServiceHandler};

/// A transport the service runs on: gRPC, HTTP, a worker loop, a one-shot
/// script.
///
/// Transports are registered into a [`ServiceSet`](super::ServiceSet) under
/// their kind. The ones the definitions declare are initialized in
/// declaration order, run concurrently, and stopped during shutdown.
#[async_trait]
pub trait Service: Send + Sync + Any {
    /// The transport kind, as written in the definitions `types` list.
    fn name(&self) -> &str;

    /// Attributes logged when the service starts running.
    fn info(&self) -> Vec<Attribute>;

    async fn initialize(&self, options: ServiceOptions) -> anyhow::Result<()>;

    /// Serves until stopped or failed.
    async fn run(&self, handler: Arc<dyn ServiceHandler>) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    fn settings(&self) -> Option<&dyn ServiceSettings> {
        None
    }
}

/// Transports that own a settings block in the service definitions.
pub trait ServiceSettings: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the block cannot be decoded.
    fn definitions(&self, definitions: &Definitions) -> anyhow::Result<Arc<dyn ExternalServiceEntry>>;
}

/// Everything a transport receives when it is initialized.
#[derive(Clone)]
pub struct ServiceOptions {
    /// Zero lets the transport pick.
    pub port: u16,
    pub kind: ServiceKind,
    pub service_name: String,
    pub product: String,
    pub logger: Arc<dyn LoggerApi>,
    pub errors: Arc<dyn ErrorApi>,
    pub service_context: Arc<ServiceContext>,
    pub tags: HashMap<String, String>,
    /// Application-supplied options for this kind.
    pub service: ApiSet,
    /// Roles the service object exposes.
    pub roles: Roles,
    pub definitions: Arc<Definitions>,
    pub features: Arc<FeatureSet>,
    pub env: Arc<dyn EnvApi>,
}

impl std::fmt::Debug for ServiceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceOptions")
            .field("port", &self.port)
            .field("kind", &self.kind)
            .field("service_name", &self.service_name)
            .field("service", &self.service)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}
