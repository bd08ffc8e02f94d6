use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{Attribute, LoggerApi};
use parking_lot::RwLock;

use crate::api::ApiSet;
use crate::plugin::feature::LOGGER_FEATURE_NAME;
use crate::plugin::{CanBeInitializedOptions, Feature, FeatureEntry, InitializeOptions};

/// Publishes the service logger as `dyn LoggerApi`.
pub struct LoggerFeature {
    entry: FeatureEntry,
    logger: RwLock<Option<Arc<dyn LoggerApi>>>,
}

impl LoggerFeature {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entry: FeatureEntry::new(LOGGER_FEATURE_NAME),
            logger: RwLock::new(None),
        }
    }
}

impl Default for LoggerFeature {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Feature for LoggerFeature {
    fn entry(&self) -> &FeatureEntry {
        &self.entry
    }

    fn can_be_initialized(&self, _options: &CanBeInitializedOptions<'_>) -> bool {
        true
    }

    async fn initialize(&self, options: &InitializeOptions) -> anyhow::Result<()> {
        *self.logger.write() = Some(Arc::clone(&options.logger));
        Ok(())
    }

    fn fields(&self) -> Vec<Attribute> {
        self.logger
            .read()
            .as_ref()
            .map(|logger| vec![Attribute::string("logger.level", logger.level().as_str())])
            .unwrap_or_default()
    }

    fn service_api(&self) -> Option<ApiSet> {
        let logger = self.logger.read().clone()?;
        Some(ApiSet::new().with::<dyn LoggerApi>(logger))
    }
}
