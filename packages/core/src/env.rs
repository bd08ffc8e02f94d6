//! Environment accessor.
//!
//! Values are looked up with service-scoped precedence: for a service named
//! `orders`, `orders__KEEL_HTTP_PORT` wins over `KEEL_HTTP_PORT`.

use std::collections::HashMap;
use std::str::FromStr;

use crate::definition::{Definitions, ServiceDeploy};

/// Suffix allowed on names passed to [`EnvApi::get`], marking a value that
/// comes from the environment.
pub const ENV_NOTATION: &str = "@env";

const SCOPE_SEPARATOR: &str = "__";

pub const DEPLOY_VAR: &str = "KEEL_SERVICE_DEPLOY";
pub const TRACKER_HEADER_VAR: &str = "KEEL_TRACKER_HEADER_NAME";
pub const CICD_VAR: &str = "KEEL_CICD_TEST";
pub const COUPLED_NAMESPACE_VAR: &str = "KEEL_COUPLED_NAMESPACE";
pub const COUPLED_PORT_VAR: &str = "KEEL_COUPLED_PORT";
pub const GRPC_PORT_VAR: &str = "KEEL_GRPC_PORT";
pub const HTTP_PORT_VAR: &str = "KEEL_HTTP_PORT";

// ---------------------------------------------------------------------------
// VarSource
// ---------------------------------------------------------------------------

/// Where environment values come from.
pub trait VarSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl VarSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl VarSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvError {
    #[error("environment variable '{0}' must be set")]
    Missing(String),

    #[error("environment variable '{name}' has invalid value '{value}': {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// GlobalEnvs
// ---------------------------------------------------------------------------

/// Framework-reserved values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalEnvs {
    pub deployment_env: ServiceDeploy,
    pub tracker_header_name: String,
    pub is_cicd: bool,
    /// Namespace appended to outbound client hosts.
    pub coupled_namespace: String,
    pub coupled_port: u16,
    pub grpc_port: u16,
    pub http_port: u16,
}

impl Default for GlobalEnvs {
    fn default() -> Self {
        Self {
            deployment_env: ServiceDeploy::Local,
            tracker_header_name: "X-Request-ID".to_string(),
            is_cicd: false,
            coupled_namespace: String::new(),
            coupled_port: 7070,
            grpc_port: 7070,
            http_port: 8080,
        }
    }
}

impl GlobalEnvs {
    /// Loads the reserved values, falling back to defaults for unset ones.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::Invalid`] if a set value cannot be parsed.
    pub fn load(service_name: &str, source: &dyn VarSource) -> Result<Self, EnvError> {
        let defaults = Self::default();
        let lookup = Scoped {
            service_name,
            source,
        };

        let deployment_env = lookup
            .get(DEPLOY_VAR)
            .map_or(defaults.deployment_env, |(_, v)| {
                v.parse().unwrap_or(ServiceDeploy::Unknown)
            });

        Ok(Self {
            deployment_env,
            tracker_header_name: lookup
                .get(TRACKER_HEADER_VAR)
                .map_or(defaults.tracker_header_name, |(_, v)| v),
            is_cicd: lookup.parse(CICD_VAR, defaults.is_cicd, parse_bool)?,
            coupled_namespace: lookup
                .get(COUPLED_NAMESPACE_VAR)
                .map_or(defaults.coupled_namespace, |(_, v)| v),
            coupled_port: lookup.parse(COUPLED_PORT_VAR, defaults.coupled_port, parse_from_str)?,
            grpc_port: lookup.parse(GRPC_PORT_VAR, defaults.grpc_port, parse_from_str)?,
            http_port: lookup.parse(HTTP_PORT_VAR, defaults.http_port, parse_from_str)?,
        })
    }
}

struct Scoped<'a> {
    service_name: &'a str,
    source: &'a dyn VarSource,
}

impl Scoped<'_> {
    /// Returns the variable name that matched and its non-empty value.
    fn get(&self, key: &str) -> Option<(String, String)> {
        let scoped = format!("{}{SCOPE_SEPARATOR}{key}", self.service_name);
        [scoped, key.to_string()]
            .into_iter()
            .find_map(|name| self.source.var(&name).filter(|v| !v.is_empty()).map(|v| (name, v)))
    }

    fn parse<T>(&self, key: &str, default: T, parse: fn(&str) -> Result<T, String>) -> Result<T, EnvError> {
        match self.get(key) {
            Some((name, value)) => parse(&value).map_err(|reason| EnvError::Invalid { name, value, reason }),
            None => Ok(default),
        }
    }
}

fn parse_from_str<T: FromStr>(value: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| e.to_string())
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" => Ok(true),
        "0" | "f" | "false" | "no" => Ok(false),
        _ => Err("expected a boolean".to_string()),
    }
}

// ---------------------------------------------------------------------------
// EnvApi / ServiceEnvs
// ---------------------------------------------------------------------------

/// Environment access offered to features and service code.
pub trait EnvApi: Send + Sync {
    /// Value of a variable listed in the service's `envs`. A trailing `@env`
    /// on `name` is ignored.
    fn get(&self, name: &str) -> Option<String>;

    /// # Errors
    ///
    /// Returns [`EnvError::Missing`] if the variable is not defined and
    /// [`EnvError::Invalid`] if it is not an integer.
    fn get_int(&self, name: &str) -> Result<i64, EnvError> {
        let value = self.get(name).ok_or_else(|| EnvError::Missing(name.to_string()))?;
        parse_from_str(&value).map_err(|reason| EnvError::Invalid {
            name: name.to_string(),
            value,
            reason,
        })
    }

    /// # Errors
    ///
    /// Returns [`EnvError::Missing`] if the variable is not defined and
    /// [`EnvError::Invalid`] if it is not a boolean.
    fn get_bool(&self, name: &str) -> Result<bool, EnvError> {
        let value = self.get(name).ok_or_else(|| EnvError::Missing(name.to_string()))?;
        parse_bool(&value).map_err(|reason| EnvError::Invalid {
            name: name.to_string(),
            value,
            reason,
        })
    }

    fn deployment_env(&self) -> ServiceDeploy;
    fn tracker_header_name(&self) -> String;
    fn is_cicd(&self) -> bool;
}

/// Framework-reserved values plus the variables a service declares as
/// mandatory in its definitions.
#[derive(Debug, Clone)]
pub struct ServiceEnvs {
    envs: GlobalEnvs,
    defined: HashMap<String, String>,
}

impl ServiceEnvs {
    /// # Errors
    ///
    /// Returns [`EnvError::Missing`] for the first declared variable that is
    /// unset or empty, or [`EnvError::Invalid`] for a malformed reserved one.
    pub fn load(defs: &Definitions, source: &dyn VarSource) -> Result<Self, EnvError> {
        let envs = GlobalEnvs::load(defs.service_name(), source)?;
        let lookup = Scoped {
            service_name: defs.service_name(),
            source,
        };

        let defined = defs
            .envs
            .iter()
            .map(|name| {
                lookup
                    .get(name)
                    .map(|(_, value)| (name.clone(), value))
                    .ok_or_else(|| EnvError::Missing(name.clone()))
            })
            .collect::<Result<_, _>>()?;

        Ok(Self { envs, defined })
    }

    #[must_use]
    pub fn globals(&self) -> &GlobalEnvs {
        &self.envs
    }

    #[must_use]
    pub fn defined_env(&self, name: &str) -> Option<&str> {
        self.defined.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn coupled_namespace(&self) -> &str {
        &self.envs.coupled_namespace
    }

    #[must_use]
    pub fn coupled_port(&self) -> u16 {
        self.envs.coupled_port
    }

    #[must_use]
    pub fn grpc_port(&self) -> u16 {
        self.envs.grpc_port
    }

    #[must_use]
    pub fn http_port(&self) -> u16 {
        self.envs.http_port
    }

    #[must_use]
    pub fn is_test(&self) -> bool {
        self.envs.deployment_env == ServiceDeploy::Test
    }
}

impl EnvApi for ServiceEnvs {
    fn get(&self, name: &str) -> Option<String> {
        let name = name.strip_suffix(ENV_NOTATION).unwrap_or(name);
        self.defined.get(name).cloned()
    }

    fn deployment_env(&self) -> ServiceDeploy {
        self.envs.deployment_env
    }

    fn tracker_header_name(&self) -> String {
        self.envs.tracker_header_name.clone()
    }

    fn is_cicd(&self) -> bool {
        self.envs.is_cicd
    }
}
