use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use keel_core::ServiceKind;
use parking_lot::RwLock;

use super::service::Service;
use crate::error::PluginError;

/// Registry of transports, keyed by kind. The first registration of a kind
/// wins.
pub struct ServiceSet {
    by_kind: DashMap<String, Arc<dyn Service>>,
    order: RwLock<Vec<String>>,
}

impl ServiceSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_kind: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    pub fn register<S: Service>(&self, service: S) {
        self.register_arc(Arc::new(service));
    }

    pub fn register_arc(&self, service: Arc<dyn Service>) {
        let kind = service.name().to_string();
        if kind.is_empty() {
            return;
        }

        if let Entry::Vacant(slot) = self.by_kind.entry(kind.clone()) {
            slot.insert(service);
            self.order.write().push(kind);
        }
    }

    /// # Errors
    ///
    /// Returns [`PluginError::ServiceNotFound`] if no transport is registered
    /// for `kind`.
    pub fn get(&self, kind: &str) -> Result<Arc<dyn Service>, PluginError> {
        self.by_kind
            .get(kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PluginError::ServiceNotFound(kind.to_string()))
    }

    /// Snapshot of every transport in registration order.
    #[must_use]
    pub fn iter(&self) -> Vec<Arc<dyn Service>> {
        let order = self.order.read().clone();
        order
            .iter()
            .filter_map(|kind| self.by_kind.get(kind).map(|entry| Arc::clone(entry.value())))
            .collect()
    }

    /// Copies the transports of `other` whose kind is not present yet.
    pub fn append(&self, other: &ServiceSet) {
        for service in other.iter() {
            self.register_arc(service);
        }
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<ServiceKind> {
        self.order.read().iter().map(|kind| ServiceKind::new(kind.clone())).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

impl Default for ServiceSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSet")
            .field("kinds", &*self.order.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use keel_core::Attribute;

    use super::*;
    use crate::handler::ServiceHandler;
    use crate::plugin::ServiceOptions;

    struct Named {
        kind: &'static str,
        port: u16,
    }

    #[async_trait]
    impl Service for Named {
        fn name(&self) -> &str {
            self.kind
        }

        fn info(&self) -> Vec<Attribute> {
            vec![Attribute::uint("port", u64::from(self.port))]
        }

        async fn initialize(&self, _options: ServiceOptions) -> anyhow::Result<()> {
            Ok(())
        }

        async fn run(&self, _handler: Arc<dyn ServiceHandler>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn first_registration_wins() {
        let set = ServiceSet::new();
        set.register(Named { kind: "worker", port: 1 });
        set.register(Named { kind: "worker", port: 2 });

        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get("worker").unwrap().info(),
            vec![Attribute::uint("port", 1)]
        );
    }

    #[test]
    fn missing_kind_is_an_error() {
        let set = ServiceSet::new();
        assert!(matches!(set.get("grpc"), Err(PluginError::ServiceNotFound(k)) if k == "grpc"));
    }

    #[test]
    fn append_preserves_existing_kinds() {
        let builtin = ServiceSet::new();
        builtin.register(Named { kind: "worker", port: 1 });
        let external = ServiceSet::new();
        external.register(Named { kind: "grpc", port: 9 });
        external.register(Named { kind: "worker", port: 2 });

        builtin.append(&external);

        assert_eq!(builtin.kinds(), vec![ServiceKind::WORKER, ServiceKind::GRPC]);
        assert_eq!(
            builtin.get("worker").unwrap().info(),
            vec![Attribute::uint("port", 1)]
        );
    }
}
