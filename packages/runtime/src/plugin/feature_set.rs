use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use keel_core::Attribute;
use parking_lot::RwLock;

use super::feature::{CanBeInitializedOptions, Feature, InitializeOptions, UpdateInfo};
use crate::api::ApiSet;
use crate::error::PluginError;

// ---------------------------------------------------------------------------
// FeatureSet
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Registered {
    feature: Arc<dyn Feature>,
    /// The feature under its concrete type, for features without a
    /// service API.
    own: ApiSet,
}

/// Registry of features, keyed by their declared name.
///
/// The first registration of a name wins; later ones are ignored. Features
/// are initialized in registration order and cleaned up in reverse
/// initialization order.
pub struct FeatureSet {
    by_name: DashMap<String, Registered>,
    /// Registration order for deterministic iteration.
    order: RwLock<Vec<String>>,
    /// Features whose `initialize` succeeded, in call order.
    initialized: RwLock<Vec<String>>,
}

impl FeatureSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            order: RwLock::new(Vec::new()),
            initialized: RwLock::new(Vec::new()),
        }
    }

    /// Registers a feature. Its concrete type becomes resolvable when it
    /// exposes no service API.
    pub fn register<F: Feature>(&self, feature: F) {
        self.register_arc(Arc::new(feature));
    }

    pub fn register_arc<F: Feature>(&self, feature: Arc<F>) {
        let own = ApiSet::new().with(Arc::clone(&feature));
        self.insert(Registered { feature, own });
    }

    fn insert(&self, registered: Registered) {
        let name = registered.feature.entry().name();
        if name.is_empty() {
            return;
        }

        if let Entry::Vacant(slot) = self.by_name.entry(name.clone()) {
            slot.insert(registered);
            self.order.write().push(name);
        }
    }

    /// # Errors
    ///
    /// Returns [`PluginError::FeatureNotFound`] if no feature is registered
    /// under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Feature>, PluginError> {
        self.by_name
            .get(name)
            .map(|entry| Arc::clone(&entry.feature))
            .ok_or_else(|| PluginError::FeatureNotFound(name.to_string()))
    }

    /// The feature registered under `name`, if it has concrete type `F`.
    #[must_use]
    pub fn get_as<F: Feature>(&self, name: &str) -> Option<Arc<F>> {
        self.by_name.get(name).and_then(|entry| entry.own.get::<F>())
    }

    /// Snapshot of every feature in registration order.
    #[must_use]
    pub fn iter(&self) -> Vec<Arc<dyn Feature>> {
        self.registered().into_iter().map(|r| r.feature).collect()
    }

    /// Snapshot of `(name, feature)` pairs in registration order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Arc<dyn Feature>)> {
        let order = self.order.read().clone();
        order
            .into_iter()
            .filter_map(|name| {
                let feature = Arc::clone(&self.by_name.get(&name)?.feature);
                Some((name, feature))
            })
            .collect()
    }

    fn registered(&self) -> Vec<Registered> {
        let order = self.order.read().clone();
        order
            .iter()
            .filter_map(|name| self.by_name.get(name).map(|entry| entry.value().clone()))
            .collect()
    }

    /// Copies the features of `other` whose name is not present yet, in
    /// `other`'s order.
    pub fn append(&self, other: &FeatureSet) {
        for registered in other.registered() {
            self.insert(registered);
        }
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Every registered feature, by name.
    #[must_use]
    pub fn dependencies(&self) -> HashMap<String, Arc<dyn Feature>> {
        self.entries().into_iter().collect()
    }

    // -- lifecycle --

    /// Checks each feature's eligibility, records the outcome on it, and
    /// initializes the eligible ones in registration order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing `initialize`. Features initialized before
    /// it stay initialized.
    pub async fn initialize_all(
        &self,
        can_opts: &CanBeInitializedOptions<'_>,
        mut options: InitializeOptions,
    ) -> Result<(), PluginError> {
        options.dependencies = self.dependencies();

        for (name, feature) in self.entries() {
            let enabled = feature.can_be_initialized(can_opts);
            feature.entry().update_info(UpdateInfo {
                enabled,
                name: None,
                logger: Some(Arc::clone(&options.logger)),
                errors: Some(Arc::clone(&options.errors)),
            });

            if !enabled {
                continue;
            }

            feature
                .initialize(&options)
                .await
                .map_err(|source| PluginError::Feature {
                    name: name.clone(),
                    stage: "initialize",
                    source,
                })?;
            self.initialized.write().push(name);
        }

        Ok(())
    }

    /// Hands the service object to every initialized feature with a
    /// controller.
    ///
    /// # Errors
    ///
    /// Stops at the first failing `start`.
    pub async fn start_all(&self, service: &(dyn Any + Send + Sync)) -> Result<(), PluginError> {
        let initialized = self.initialized.read().clone();
        for name in initialized {
            let feature = self.get(&name)?;
            if let Some(controller) = feature.controller() {
                controller
                    .start(service)
                    .await
                    .map_err(|source| PluginError::Feature {
                        name,
                        stage: "start",
                        source,
                    })?;
            }
        }
        Ok(())
    }

    /// Cleans up every initialized feature with a controller, in reverse
    /// initialization order. A failing cleanup does not stop the others.
    /// Calling it again is a no-op.
    pub async fn cleanup_all(&self) -> Vec<PluginError> {
        let initialized = std::mem::take(&mut *self.initialized.write());
        let mut errors = Vec::new();

        for name in initialized.into_iter().rev() {
            let Ok(feature) = self.get(&name) else {
                continue;
            };
            if let Some(controller) = feature.controller() {
                if let Err(source) = controller.cleanup().await {
                    errors.push(PluginError::Feature {
                        name,
                        stage: "cleanup",
                        source,
                    });
                }
            }
        }

        errors
    }

    /// Attributes of every enabled feature, for the startup summary.
    #[must_use]
    pub fn fields(&self) -> Vec<Attribute> {
        self.iter()
            .into_iter()
            .filter(|feature| feature.entry().is_enabled())
            .flat_map(|feature| feature.fields())
            .collect()
    }

    // -- resolution --

    /// The first enabled feature, in registration order, providing `T`.
    ///
    /// A feature exposing a service API is matched against that API only;
    /// otherwise its concrete type is.
    #[must_use]
    pub fn resolve<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registered().into_iter().find_map(|registered| {
            if !registered.feature.entry().is_enabled() {
                return None;
            }
            match registered.feature.service_api() {
                Some(api) => api.get::<T>(),
                None => registered.own.get::<T>(),
            }
        })
    }

    /// `T` from the framework API of the enabled feature named `name`.
    #[must_use]
    pub fn framework_api<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let feature = self.get(name).ok()?;
        if !feature.entry().is_enabled() {
            return None;
        }
        feature.framework_api()?.get::<T>()
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureSet")
            .field("features", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
