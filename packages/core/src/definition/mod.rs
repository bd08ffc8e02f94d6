//! Service definitions: the configuration snapshot decoded from
//! `service.toml`.
//!
//! A [`Definitions`] value is built once per run, extended with the settings
//! blocks of external features and transports, validated, and then shared
//! read-only with every feature and transport.

mod error;
mod types;
mod validate;

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use error::DefinitionError;
pub use types::{
    ClientDefinitions, FeatureToggle, LogDefinitions, ServiceDeploy, ServiceKind, TestsDefinitions,
};
pub use validate::validate_version;

/// Languages a service may declare.
pub const SUPPORTED_LANGUAGES: &[&str] = &["rust"];

// ---------------------------------------------------------------------------
// External settings entries
// ---------------------------------------------------------------------------

/// Settings block owned by an external feature.
pub trait ExternalFeatureEntry: Any + fmt::Debug + Send + Sync {
    fn enabled(&self) -> bool;

    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    fn validate(&self) -> anyhow::Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Settings block owned by an external transport.
pub trait ExternalServiceEntry: Any + fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    fn validate(&self) -> anyhow::Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// A type decoded from the `[service]` block.
pub trait CustomDefinitions: DeserializeOwned + Send + Sync + 'static {
    /// Checks the decoded values. The default accepts anything.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    fn validate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Definitions {
    pub name: String,
    /// Transport kinds, each `kind` or `kind:port`.
    pub types: Vec<String>,
    pub version: String,
    pub language: Option<String>,
    pub product: String,
    /// Environment variables that must be set when the service starts.
    pub envs: Vec<String>,
    /// Raw `[features.<name>]` blocks.
    pub features: toml::Table,
    pub log: LogDefinitions,
    pub tests: TestsDefinitions,
    /// Service-specific `[service]` block.
    pub service: toml::Table,
    pub clients: BTreeMap<String, ClientDefinitions>,
    /// Raw `[services.<kind>]` blocks.
    pub services: BTreeMap<String, toml::Table>,

    #[serde(skip)]
    path: Option<PathBuf>,
    #[serde(skip)]
    supported_kinds: Vec<ServiceKind>,
    #[serde(skip)]
    external_features: HashMap<String, Arc<dyn ExternalFeatureEntry>>,
    #[serde(skip)]
    external_services: HashMap<String, Arc<dyn ExternalServiceEntry>>,
}

impl Default for Definitions {
    fn default() -> Self {
        Self {
            name: String::new(),
            types: Vec::new(),
            version: String::new(),
            language: None,
            product: String::new(),
            envs: Vec::new(),
            features: toml::Table::new(),
            log: LogDefinitions::default(),
            tests: TestsDefinitions::default(),
            service: toml::Table::new(),
            clients: BTreeMap::new(),
            services: BTreeMap::new(),
            path: None,
            supported_kinds: ServiceKind::builtin(),
            external_features: HashMap::new(),
            external_services: HashMap::new(),
        }
    }
}

impl FromStr for Definitions {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut defs: Self = toml::from_str(s)?;
        defs.supported_kinds = ServiceKind::builtin();
        Ok(defs)
    }
}

impl Definitions {
    /// Reads and decodes a definitions file. The result is not validated.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::Read`] if the file cannot be read and
    /// [`DefinitionError::Parse`] if it is not valid TOML for this schema.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut defs: Self = content.parse()?;
        defs.path = Some(path.to_path_buf());
        Ok(defs)
    }

    /// File the definitions were read from, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.name
    }

    /// Declared transport kinds with their optional port override, in
    /// declaration order.
    #[must_use]
    pub fn service_types(&self) -> Vec<(ServiceKind, Option<u16>)> {
        self.types
            .iter()
            .map(|entry| {
                let (kind, port) = split_kind_and_port(entry);
                (ServiceKind::from(kind), port.and_then(|p| p.parse().ok()))
            })
            .collect()
    }

    #[must_use]
    pub fn is_service_type(&self, kind: &ServiceKind) -> bool {
        self.service_types().iter().any(|(k, _)| k == kind)
    }

    #[must_use]
    pub fn service_types_as_string(&self) -> String {
        self.service_types()
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Accepts `kind` in the `types` list from now on.
    pub fn add_supported_service_type(&mut self, kind: ServiceKind) {
        if !self.supported_kinds.contains(&kind) {
            self.supported_kinds.push(kind);
        }
    }

    #[must_use]
    pub fn supported_service_types(&self) -> &[ServiceKind] {
        &self.supported_kinds
    }

    pub fn add_external_feature_definitions(&mut self, name: impl Into<String>, entry: Arc<dyn ExternalFeatureEntry>) {
        self.external_features.insert(name.into(), entry);
    }

    /// # Errors
    ///
    /// Returns [`DefinitionError::FeatureNotFound`] if no feature registered
    /// settings under `name`.
    pub fn external_feature_definitions(&self, name: &str) -> Result<Arc<dyn ExternalFeatureEntry>, DefinitionError> {
        self.external_features
            .get(name)
            .cloned()
            .ok_or_else(|| DefinitionError::FeatureNotFound(name.to_string()))
    }

    pub fn add_external_service_definitions(&mut self, name: impl Into<String>, entry: Arc<dyn ExternalServiceEntry>) {
        self.external_services.insert(name.into(), entry);
    }

    /// # Errors
    ///
    /// Returns [`DefinitionError::ServiceNotFound`] if no transport
    /// registered settings under `name`.
    pub fn external_service_definitions(&self, name: &str) -> Result<Arc<dyn ExternalServiceEntry>, DefinitionError> {
        self.external_services
            .get(name)
            .cloned()
            .ok_or_else(|| DefinitionError::ServiceNotFound(name.to_string()))
    }

    /// Raw `[features.<name>]` block.
    #[must_use]
    pub fn feature_block(&self, name: &str) -> Option<&toml::Table> {
        self.features.get(name).and_then(toml::Value::as_table)
    }

    /// Decodes a `[features.<name>]` block into `T`, or `T::default()` when
    /// the block is absent.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::Parse`] if the block does not match `T`.
    pub fn decode_feature_block<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, DefinitionError> {
        match self.feature_block(name) {
            Some(block) => Ok(toml::Value::Table(block.clone()).try_into()?),
            None => Ok(T::default()),
        }
    }

    /// Whether `[features.<name>] enabled = true` is set.
    #[must_use]
    pub fn is_feature_enabled(&self, name: &str) -> bool {
        self.decode_feature_block::<FeatureToggle>(name)
            .is_ok_and(|toggle| toggle.enabled)
    }

    /// Raw `[services.<kind>]` block.
    #[must_use]
    pub fn service_block(&self, kind: &ServiceKind) -> Option<&toml::Table> {
        self.services.get(kind.as_str())
    }

    /// Decodes the `[service]` block into `T` and runs its validation.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::Parse`] if the block does not match `T` and
    /// [`DefinitionError::Custom`] if `T::validate` rejects it.
    pub fn load_custom_definitions<T: CustomDefinitions>(&self) -> Result<T, DefinitionError> {
        let value: T = toml::Value::Table(self.service.clone()).try_into()?;
        value.validate().map_err(DefinitionError::Custom)?;
        Ok(value)
    }

    /// `true` when `[tests] discard_log_messages` is unset or true.
    #[must_use]
    pub fn discard_test_log_messages(&self) -> bool {
        self.tests.discard_log_messages.unwrap_or(true)
    }
}

fn split_kind_and_port(entry: &str) -> (&str, Option<&str>) {
    match entry.split_once(':') {
        Some((kind, port)) => (kind, Some(port)),
        None => (entry, None),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = r#"
        name = "orders"
        types = ["http:9000", "worker"]
        version = "v1.2.0"
        product = "shop"
        envs = ["DATABASE_URL"]

        [features.tracker]
        enabled = true

        [log]
        level = "debug"
        attributes = { team = "checkout" }

        [tests]
        execute_lifecycle = true

        [service]
        batch_size = 25

        [clients.billing]
        host = "localhost"
        port = 7171

        [services.http]
        base_path = "/orders"
    "#;

    #[test]
    fn parses_all_blocks() {
        let defs: Definitions = SAMPLE.parse().unwrap();

        assert_eq!(defs.service_name(), "orders");
        assert_eq!(
            defs.service_types(),
            vec![(ServiceKind::HTTP, Some(9000)), (ServiceKind::WORKER, None)]
        );
        assert_eq!(defs.service_types_as_string(), "http,worker");
        assert!(defs.is_service_type(&ServiceKind::WORKER));
        assert!(!defs.is_service_type(&ServiceKind::GRPC));
        assert_eq!(defs.log.level.as_deref(), Some("debug"));
        assert_eq!(defs.log.attributes["team"], "checkout");
        assert!(defs.tests.execute_lifecycle);
        assert!(defs.discard_test_log_messages());
        assert_eq!(defs.clients["billing"].port, Some(7171));
        assert!(defs.service_block(&ServiceKind::HTTP).is_some());
        assert!(defs.is_feature_enabled("tracker"));
        assert!(!defs.is_feature_enabled("auth"));
    }

    #[derive(Debug, Deserialize)]
    struct Custom {
        batch_size: u32,
    }

    impl CustomDefinitions for Custom {
        fn validate(&self) -> anyhow::Result<()> {
            anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
            Ok(())
        }
    }

    #[test]
    fn loads_custom_service_block() {
        let defs: Definitions = SAMPLE.parse().unwrap();
        let custom: Custom = defs.load_custom_definitions().unwrap();
        assert_eq!(custom.batch_size, 25);

        let defs: Definitions = SAMPLE.replace("batch_size = 25", "batch_size = 0").parse().unwrap();
        let err = defs.load_custom_definitions::<Custom>().unwrap_err();
        assert!(matches!(err, DefinitionError::Custom(_)));
    }

    #[derive(Debug)]
    struct Settings;

    impl ExternalFeatureEntry for Settings {
        fn enabled(&self) -> bool {
            true
        }

        fn validate(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn external_feature_lookup() {
        let mut defs = Definitions::default();
        assert!(matches!(
            defs.external_feature_definitions("auth"),
            Err(DefinitionError::FeatureNotFound(name)) if name == "auth"
        ));

        defs.add_external_feature_definitions("auth", Arc::new(Settings));
        let entry = defs.external_feature_definitions("auth").unwrap();
        assert!(entry.as_any().is::<Settings>());
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let defs = Definitions::from_file(file.path()).unwrap();
        assert_eq!(defs.path(), Some(file.path()));
        assert_eq!(defs.supported_service_types().len(), ServiceKind::builtin().len());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Definitions::from_file("/nonexistent/service.toml").unwrap_err();
        assert!(matches!(err, DefinitionError::Read { .. }));
    }
}
