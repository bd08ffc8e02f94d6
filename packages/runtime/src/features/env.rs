use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{Attribute, EnvApi};
use parking_lot::RwLock;

use crate::api::ApiSet;
use crate::plugin::feature::ENV_FEATURE_NAME;
use crate::plugin::{CanBeInitializedOptions, Feature, FeatureEntry, InitializeOptions};

/// Publishes the environment accessor as `dyn EnvApi`.
pub struct EnvFeature {
    entry: FeatureEntry,
    env: RwLock<Option<Arc<dyn EnvApi>>>,
}

impl EnvFeature {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entry: FeatureEntry::new(ENV_FEATURE_NAME),
            env: RwLock::new(None),
        }
    }
}

impl Default for EnvFeature {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Feature for EnvFeature {
    fn entry(&self) -> &FeatureEntry {
        &self.entry
    }

    fn can_be_initialized(&self, _options: &CanBeInitializedOptions<'_>) -> bool {
        true
    }

    async fn initialize(&self, options: &InitializeOptions) -> anyhow::Result<()> {
        *self.env.write() = Some(Arc::clone(&options.env));
        Ok(())
    }

    fn fields(&self) -> Vec<Attribute> {
        self.env
            .read()
            .as_ref()
            .map(|env| vec![Attribute::string("env.deploy", env.deployment_env().as_str())])
            .unwrap_or_default()
    }

    fn service_api(&self) -> Option<ApiSet> {
        let env = self.env.read().clone()?;
        Some(ApiSet::new().with::<dyn EnvApi>(env))
    }
}
