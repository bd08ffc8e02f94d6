use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::{split_kind_and_port, Definitions, DefinitionError, ServiceKind, SUPPORTED_LANGUAGES};
use crate::logger::Level;

const STACK_TRACE_MODES: &[&str] = &["default", "disabled", "structured"];

static VERSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^v[0-9]{1,2}(\.[0-9]{1,2})?(\.[0-9]{1,2})?$").ok());

/// Whether `input` is a valid service version such as `v1`, `v1.2` or `v1.2.3`.
#[must_use]
pub fn validate_version(input: &str) -> bool {
    VERSION.as_ref().is_some_and(|re| re.is_match(input))
}

fn is_env_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

impl Definitions {
    /// Checks the snapshot and every registered external settings entry.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.is_empty() {
            return Err(DefinitionError::Missing("name"));
        }
        if self.types.is_empty() {
            return Err(DefinitionError::Missing("types"));
        }
        if self.version.is_empty() {
            return Err(DefinitionError::Missing("version"));
        }
        if self.product.is_empty() {
            return Err(DefinitionError::Missing("product"));
        }

        self.validate_types()?;

        if !validate_version(&self.version) {
            return Err(DefinitionError::InvalidVersion(self.version.clone()));
        }

        if let Some(language) = &self.language {
            if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
                return Err(DefinitionError::UnsupportedLanguage(language.clone()));
            }
        }

        if let Some(name) = self.envs.iter().find(|name| !is_env_name(name)) {
            return Err(DefinitionError::InvalidEnvName(name.clone()));
        }

        self.validate_log()?;

        for (name, entry) in &self.external_services {
            entry.validate().map_err(|source| DefinitionError::External {
                name: name.clone(),
                source,
            })?;
        }

        for (name, entry) in &self.external_features {
            entry.validate().map_err(|source| DefinitionError::External {
                name: name.clone(),
                source,
            })?;
        }

        Ok(())
    }

    fn validate_types(&self) -> Result<(), DefinitionError> {
        let mut seen = HashSet::new();

        for entry in &self.types {
            let (kind, port) = split_kind_and_port(entry);

            if let Some(port) = port {
                if port.parse::<u16>().is_err() {
                    return Err(DefinitionError::InvalidPort(entry.clone()));
                }
            }

            if !self.supported_kinds.iter().any(|k| k.as_str() == kind) {
                return Err(DefinitionError::UnsupportedServiceType(kind.to_string()));
            }

            if !seen.insert(kind) {
                return Err(DefinitionError::DuplicatedServiceType(kind.to_string()));
            }
        }

        if seen.contains(ServiceKind::SCRIPT.as_str()) && seen.len() > 1 {
            return Err(DefinitionError::ScriptNotAlone);
        }

        Ok(())
    }

    fn validate_log(&self) -> Result<(), DefinitionError> {
        if let Some(level) = &self.log.level {
            level
                .parse::<Level>()
                .map_err(|_| DefinitionError::InvalidLogOption {
                    field: "level",
                    value: level.clone(),
                })?;
        }

        if let Some(mode) = &self.log.error_stack_trace {
            if !STACK_TRACE_MODES.contains(&mode.as_str()) {
                return Err(DefinitionError::InvalidLogOption {
                    field: "error_stack_trace",
                    value: mode.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::Arc;

    use super::*;
    use crate::definition::ExternalServiceEntry;

    fn valid() -> Definitions {
        r#"
            name = "orders"
            types = ["grpc"]
            version = "v1.0.0"
            product = "shop"
        "#
        .parse()
        .unwrap()
    }

    #[test]
    fn version_format() {
        for ok in ["v1", "v1.2", "v1.2.3", "v10.20.30"] {
            assert!(validate_version(ok), "{ok}");
        }
        for bad in ["", "1.0.0", "version1", "v1.2.3.4", "v100", "v1.x"] {
            assert!(!validate_version(bad), "{bad}");
        }
    }

    #[test]
    fn accepts_minimal_definitions() {
        valid().validate().unwrap();
    }

    #[test]
    fn version_needs_v_prefix() {
        let mut defs = valid();
        defs.version = "1.0.0".into();
        assert!(matches!(defs.validate(), Err(DefinitionError::InvalidVersion(v)) if v == "1.0.0"));
    }

    #[test]
    fn required_fields() {
        let mut defs = valid();
        defs.product.clear();
        assert!(matches!(defs.validate(), Err(DefinitionError::Missing("product"))));
    }

    #[test]
    fn rejects_unknown_and_duplicated_kinds() {
        let mut defs = valid();
        defs.types = vec!["ftp".into()];
        assert!(matches!(defs.validate(), Err(DefinitionError::UnsupportedServiceType(k)) if k == "ftp"));

        defs.types = vec!["grpc:7000".into(), "grpc:7001".into()];
        assert!(matches!(defs.validate(), Err(DefinitionError::DuplicatedServiceType(k)) if k == "grpc"));
    }

    #[test]
    fn registered_kinds_become_valid() {
        let mut defs = valid();
        defs.types = vec!["cronjob".into()];
        assert!(defs.validate().is_err());

        defs.add_supported_service_type(ServiceKind::new("cronjob"));
        defs.validate().unwrap();
    }

    #[test]
    fn script_must_be_alone() {
        let mut defs = valid();
        defs.types = vec!["script".into(), "http".into()];
        assert!(matches!(defs.validate(), Err(DefinitionError::ScriptNotAlone)));
    }

    #[test]
    fn invalid_port() {
        let mut defs = valid();
        defs.types = vec!["http:eighty".into()];
        assert!(matches!(defs.validate(), Err(DefinitionError::InvalidPort(_))));
    }

    #[test]
    fn env_names_must_be_uppercase() {
        let mut defs = valid();
        defs.envs = vec!["DATABASE_URL".into(), "api_key".into()];
        assert!(matches!(defs.validate(), Err(DefinitionError::InvalidEnvName(n)) if n == "api_key"));
    }

    #[test]
    fn log_options() {
        let mut defs = valid();
        defs.log.level = Some("verbose".into());
        assert!(matches!(
            defs.validate(),
            Err(DefinitionError::InvalidLogOption { field: "level", .. })
        ));
    }

    #[derive(Debug)]
    struct BrokenSettings;

    impl ExternalServiceEntry for BrokenSettings {
        fn name(&self) -> &str {
            "cronjob"
        }

        fn validate(&self) -> anyhow::Result<()> {
            anyhow::bail!("schedule is required")
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn external_entries_are_validated() {
        let mut defs = valid();
        defs.add_external_service_definitions("cronjob", Arc::new(BrokenSettings));
        let err = defs.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "definitions of 'cronjob' are invalid: schedule is required"
        );
    }
}
