use std::path::PathBuf;

/// Errors raised while loading or validating service definitions.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("could not read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse definitions: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field '{0}'")]
    Missing(&'static str),

    #[error("unsupported service type '{0}'")]
    UnsupportedServiceType(String),

    #[error("service type '{0}' declared more than once")]
    DuplicatedServiceType(String),

    #[error("'script' service type cannot be combined with other types")]
    ScriptNotAlone,

    #[error("invalid port in service type entry '{0}'")]
    InvalidPort(String),

    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),

    #[error("invalid environment variable name '{0}'")]
    InvalidEnvName(String),

    #[error("invalid log option {field} = '{value}'")]
    InvalidLogOption { field: &'static str, value: String },

    #[error("could not find definitions for feature '{0}'")]
    FeatureNotFound(String),

    #[error("could not find definitions for service '{0}'")]
    ServiceNotFound(String),

    #[error("definitions of '{name}' are invalid: {source}")]
    External {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid custom service definitions: {0}")]
    Custom(#[source] anyhow::Error),
}
