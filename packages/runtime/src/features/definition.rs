use std::sync::Arc;

use async_trait::async_trait;
use keel_core::definition::CustomDefinitions;
use keel_core::{Attribute, DefinitionError, Definitions};
use parking_lot::RwLock;

use crate::api::ApiSet;
use crate::plugin::feature::DEFINITION_FEATURE_NAME;
use crate::plugin::{CanBeInitializedOptions, Feature, FeatureEntry, InitializeOptions};

/// Read access to the service definitions.
pub trait DefinitionApi: Send + Sync {
    fn service_name(&self) -> String;

    fn definitions(&self) -> Arc<Definitions>;
}

impl dyn DefinitionApi + '_ {
    /// Decodes the `[service]` block into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the block does not decode into `T` or fails its
    /// validation.
    pub fn custom<T: CustomDefinitions>(&self) -> Result<T, DefinitionError> {
        self.definitions().load_custom_definitions::<T>()
    }
}

pub struct DefinitionFeature {
    entry: FeatureEntry,
    definitions: RwLock<Option<Arc<Definitions>>>,
}

impl DefinitionFeature {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entry: FeatureEntry::new(DEFINITION_FEATURE_NAME),
            definitions: RwLock::new(None),
        }
    }
}

impl Default for DefinitionFeature {
    fn default() -> Self {
        Self::new()
    }
}

struct Snapshot(Arc<Definitions>);

impl DefinitionApi for Snapshot {
    fn service_name(&self) -> String {
        self.0.service_name().to_string()
    }

    fn definitions(&self) -> Arc<Definitions> {
        Arc::clone(&self.0)
    }
}

#[async_trait]
impl Feature for DefinitionFeature {
    fn entry(&self) -> &FeatureEntry {
        &self.entry
    }

    fn can_be_initialized(&self, _options: &CanBeInitializedOptions<'_>) -> bool {
        true
    }

    async fn initialize(&self, options: &InitializeOptions) -> anyhow::Result<()> {
        *self.definitions.write() = Some(Arc::clone(&options.definitions));
        Ok(())
    }

    fn fields(&self) -> Vec<Attribute> {
        Vec::new()
    }

    fn service_api(&self) -> Option<ApiSet> {
        let definitions = self.definitions.read().clone()?;
        Some(ApiSet::new().with::<dyn DefinitionApi>(Arc::new(Snapshot(definitions))))
    }
}
