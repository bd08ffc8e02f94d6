use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ServiceKind
// ---------------------------------------------------------------------------

/// A transport kind a service can declare in its `types` list.
///
/// Built-in kinds are constants; external transports introduce their own
/// through [`ServiceKind::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKind(Cow<'static, str>);

impl ServiceKind {
    pub const GRPC: Self = Self(Cow::Borrowed("grpc"));
    pub const HTTP_SPEC: Self = Self(Cow::Borrowed("http-spec"));
    pub const HTTP: Self = Self(Cow::Borrowed("http"));
    pub const WORKER: Self = Self(Cow::Borrowed("worker"));
    pub const SCRIPT: Self = Self(Cow::Borrowed("script"));
    pub const NATIVE: Self = Self(Cow::Borrowed("native"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kinds every definitions snapshot accepts without registration.
    #[must_use]
    pub fn builtin() -> Vec<Self> {
        vec![
            Self::GRPC,
            Self::HTTP_SPEC,
            Self::HTTP,
            Self::WORKER,
            Self::SCRIPT,
            Self::NATIVE,
        ]
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// ---------------------------------------------------------------------------
// ServiceDeploy
// ---------------------------------------------------------------------------

/// Deployment mode the service runs under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ServiceDeploy {
    Production,
    Test,
    Development,
    #[default]
    Local,
    Unknown,
}

impl ServiceDeploy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "prod",
            Self::Test => "test",
            Self::Development => "dev",
            Self::Local => "local",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServiceDeploy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceDeploy {
    type Err = std::convert::Infallible;

    /// Unrecognized names map to [`ServiceDeploy::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "prod" => Self::Production,
            "test" => Self::Test,
            "dev" => Self::Development,
            "local" => Self::Local,
            _ => Self::Unknown,
        })
    }
}

// ---------------------------------------------------------------------------
// Definition blocks
// ---------------------------------------------------------------------------

/// `[log]` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogDefinitions {
    pub level: Option<String>,
    pub attributes: BTreeMap<String, String>,
    /// One of `default`, `disabled` or `structured`.
    pub error_stack_trace: Option<String>,
}

/// `[tests]` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestsDefinitions {
    pub execute_lifecycle: bool,
    pub discard_log_messages: Option<bool>,
}

/// `[clients.<name>]` block overriding how an outbound client connects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientDefinitions {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// The common `enabled` switch of a `[features.<name>]` block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggle {
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_kinds_compare_with_dynamic_ones() {
        assert_eq!(ServiceKind::from("http"), ServiceKind::HTTP);
        assert!(ServiceKind::builtin().contains(&ServiceKind::new("native")));
        assert_eq!(ServiceKind::SCRIPT.as_str(), "script");
    }

    #[test]
    fn deploy_parsing_is_lenient() {
        assert_eq!("PROD".parse::<ServiceDeploy>().unwrap(), ServiceDeploy::Production);
        assert_eq!("test".parse::<ServiceDeploy>().unwrap(), ServiceDeploy::Test);
        assert_eq!("staging".parse::<ServiceDeploy>().unwrap(), ServiceDeploy::Unknown);
        assert_eq!(ServiceDeploy::default().to_string(), "local");
    }
}
