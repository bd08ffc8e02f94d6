use keel_core::{Attribute, DefinitionError, EnvError};

/// Registry lookup and plugin lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("could not find feature '{0}'")]
    FeatureNotFound(String),

    #[error("could not find service implementation for '{0}'")]
    ServiceNotFound(String),

    #[error("feature '{name}' failed to {stage}: {source}")]
    Feature {
        name: String,
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{name} does not provide the {api} API")]
    MissingApi { name: String, api: &'static str },
}

/// Failures while binding outbound clients to service fields.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not find gRPC client '{0}' inside service options")]
    NotFound(String),

    #[error("gRPC client '{0}' has an empty service name")]
    EmptyServiceName(String),

    #[error("gRPC client '{0}' does not build values of the field's type")]
    TypeMismatch(String),

    #[error("field '{0}' is bound to a client but cannot hold one")]
    NotAClientField(String),

    #[error("could not connect to '{client}': {source}")]
    Connection {
        client: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A field of the service object the runtime cannot fill.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required field was left unset.
    #[error("could not initiate struct {service}, value from field {field} is missing")]
    Missing { service: String, field: String },

    /// A `feature` field whose type cannot hold an injected API.
    #[error("field {field} of struct {service} is tagged feature but cannot be injected")]
    NotInjectable { service: String, field: String },
}

impl ValidationError {
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Missing { field, .. } | Self::NotInjectable { field, .. } => field,
        }
    }
}

/// A fatal bootstrap or run failure.
///
/// Carries the human-readable stage message and the underlying cause. It is
/// logged exactly once, at fatal severity, by the orchestrator.
#[derive(Debug, thiserror::Error)]
#[error("{message}: {source}")]
pub struct AbortError {
    pub message: String,
    #[source]
    pub source: anyhow::Error,
}

impl AbortError {
    pub fn new(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Attributes logged alongside the abort message.
    #[must_use]
    pub fn attributes(&self) -> Vec<Attribute> {
        vec![Attribute::string("error", format!("{:#}", self.source))]
    }
}

impl From<DefinitionError> for AbortError {
    fn from(err: DefinitionError) -> Self {
        Self::new("service definitions error", err)
    }
}

impl From<EnvError> for AbortError {
    fn from(err: EnvError) -> Self {
        Self::new("could not load service environment", err)
    }
}
