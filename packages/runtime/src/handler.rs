use std::any::{type_name, Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{ErrorApi, LoggerApi, ServiceError};

use crate::api::ApiSet;
use crate::error::PluginError;
use crate::fields::Field;
use crate::plugin::FeatureSet;
use crate::resolver;

/// The application's service object.
///
/// The runtime fills the fields it lists, calls the lifecycle hooks, and
/// hands the object to every transport once bootstrap is done.
#[async_trait]
pub trait ServiceHandler: Any + Send + Sync {
    /// Fields the runtime injects into and validates.
    fn fields(&mut self) -> Vec<Field<'_>> {
        Vec::new()
    }

    /// Publishes the roles transports look for, such as
    /// [`HttpApi`](crate::services::http::HttpApi) or
    /// [`WorkerApi`](crate::services::worker::WorkerApi).
    fn expose(self: Arc<Self>, roles: &mut ApiSet) {
        let _ = roles;
    }

    /// Runs once after injection and client coupling, before any transport
    /// runs.
    async fn on_start(&mut self, api: &dyn ServiceApi) -> anyhow::Result<()> {
        let _ = api;
        Ok(())
    }

    /// Runs once at the start of shutdown.
    async fn on_finish(&self) {}
}

/// Roles published by `handler`.
#[must_use]
pub fn roles(handler: &Arc<dyn ServiceHandler>) -> ApiSet {
    let mut roles = ApiSet::new();
    Arc::clone(handler).expose(&mut roles);
    roles
}

/// Which roles a service object plays, without holding on to it.
///
/// Handed to transports during initialization so a missing role fails
/// bootstrap instead of the run.
#[derive(Clone, Default)]
pub struct Roles {
    ids: HashSet<TypeId>,
    names: Vec<&'static str>,
}

impl Roles {
    /// The roles `handler` exposes. The published handles are dropped
    /// before returning.
    #[must_use]
    pub fn exposed_by<S: ServiceHandler>(handler: &Arc<S>) -> Self {
        let mut set = ApiSet::new();
        Arc::clone(handler).expose(&mut set);
        Self {
            ids: set.type_ids().collect(),
            names: set.names().to_vec(),
        }
    }

    #[must_use]
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.ids.contains(&TypeId::of::<T>())
    }

    /// # Errors
    ///
    /// Returns [`PluginError::MissingApi`] when the service object does not
    /// expose `T`.
    pub fn require<T: ?Sized + 'static>(&self) -> Result<(), PluginError> {
        if self.contains::<T>() {
            Ok(())
        } else {
            Err(PluginError::MissingApi {
                name: "service object".into(),
                api: type_name::<T>(),
            })
        }
    }
}

impl fmt::Debug for Roles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(&self.names).finish()
    }
}

/// What lifecycle hooks can reach.
pub trait ServiceApi: Send + Sync {
    fn features(&self) -> &FeatureSet;

    fn errors(&self) -> &dyn ErrorApi;

    fn logger(&self) -> &dyn LoggerApi;

    /// Fails bootstrap with `message` once the hook returns.
    fn abort(&self, message: &str, err: anyhow::Error);
}

impl dyn ServiceApi + '_ {
    /// The first enabled feature providing `T`.
    ///
    /// # Errors
    ///
    /// Returns an internal error when no feature provides `T`.
    pub fn feature<T>(&self) -> Result<Arc<T>, ServiceError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        resolver::resolve::<T>(self.features(), self.errors())
    }
}

/// Service objects that only need the default hooks.
impl ServiceHandler for () {}
