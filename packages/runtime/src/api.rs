//! Typed API sets.
//!
//! Features publish the interfaces they offer, and service objects the roles
//! they play, as an [`ApiSet`]: a map from a type (usually a trait object
//! type such as `dyn LoggerApi`) to a shared handle of that type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ApiSet {
    apis: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    names: Vec<&'static str>,
}

impl ApiSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with<T>(mut self, api: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(api);
        self
    }

    /// Publishes `api` under `T`, replacing a previous entry of that type.
    pub fn insert<T>(&mut self, api: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.apis.insert(TypeId::of::<T>(), Arc::new(api)).is_none() {
            self.names.push(std::any::type_name::<T>());
        }
    }

    /// The handle published under `T`, if any.
    #[must_use]
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.apis
            .get(&TypeId::of::<T>())
            .and_then(|api| api.downcast_ref::<Arc<T>>())
            .cloned()
    }

    #[must_use]
    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + 'static,
    {
        self.apis.contains_key(&TypeId::of::<T>())
    }

    /// Type names of the published entries, in publication order.
    #[must_use]
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    pub(crate) fn type_ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.apis.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.apis.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }

    /// Copies entries of `other` whose type is not yet present.
    pub fn merge(&mut self, other: &ApiSet) {
        for (id, api) in &other.apis {
            if !self.apis.contains_key(id) {
                self.apis.insert(*id, Arc::clone(api));
            }
        }
        for name in &other.names {
            if !self.names.contains(name) {
                self.names.push(*name);
            }
        }
    }
}

impl fmt::Debug for ApiSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(&self.names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    trait Counter: Send + Sync {
        fn count(&self) -> u32;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn stores_trait_objects() {
        let set = ApiSet::new().with::<dyn Greeter>(Arc::new(English));

        let greeter = set.get::<dyn Greeter>().unwrap();
        assert_eq!(greeter.greet(), "hello");
        assert!(set.get::<dyn Counter>().is_none());
        assert!(set.contains::<dyn Greeter>());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn stores_concrete_types_separately() {
        let english = Arc::new(English);
        let set = ApiSet::new()
            .with(Arc::clone(&english))
            .with::<dyn Greeter>(english);

        assert!(set.get::<English>().is_some());
        assert!(set.get::<dyn Greeter>().is_some());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn merge_keeps_existing_entries() {
        struct Loud;
        impl Greeter for Loud {
            fn greet(&self) -> String {
                "HELLO".into()
            }
        }

        let mut first = ApiSet::new().with::<dyn Greeter>(Arc::new(English));
        let second = ApiSet::new().with::<dyn Greeter>(Arc::new(Loud));
        first.merge(&second);

        assert_eq!(first.get::<dyn Greeter>().unwrap().greet(), "hello");
    }

    #[test]
    fn debug_lists_type_names() {
        let set = ApiSet::new().with::<dyn Greeter>(Arc::new(English));
        assert!(format!("{set:?}").contains("Greeter"));
    }
}
