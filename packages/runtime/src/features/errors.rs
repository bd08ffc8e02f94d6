use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{Attribute, ErrorApi};
use parking_lot::RwLock;

use crate::api::ApiSet;
use crate::plugin::feature::ERRORS_FEATURE_NAME;
use crate::plugin::{CanBeInitializedOptions, Feature, FeatureEntry, InitializeOptions};

/// Publishes the error factory as `dyn ErrorApi`.
pub struct ErrorsFeature {
    entry: FeatureEntry,
    errors: RwLock<Option<Arc<dyn ErrorApi>>>,
}

impl ErrorsFeature {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entry: FeatureEntry::new(ERRORS_FEATURE_NAME),
            errors: RwLock::new(None),
        }
    }
}

impl Default for ErrorsFeature {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Feature for ErrorsFeature {
    fn entry(&self) -> &FeatureEntry {
        &self.entry
    }

    fn can_be_initialized(&self, _options: &CanBeInitializedOptions<'_>) -> bool {
        true
    }

    async fn initialize(&self, options: &InitializeOptions) -> anyhow::Result<()> {
        *self.errors.write() = Some(Arc::clone(&options.errors));
        Ok(())
    }

    fn fields(&self) -> Vec<Attribute> {
        Vec::new()
    }

    fn service_api(&self) -> Option<ApiSet> {
        let errors = self.errors.read().clone()?;
        Some(ApiSet::new().with::<dyn ErrorApi>(errors))
    }
}
