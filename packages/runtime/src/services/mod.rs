//! Transports every service can declare.
//!
//! `grpc` and `http-spec` are recognized kinds without a built-in
//! transport; applications register their own with
//! [`AppBuilder::with_services`](crate::app::AppBuilder::with_services).

pub mod http;
pub mod native;
pub mod script;
pub mod worker;

pub use http::{HttpApi, HttpService, HttpServiceDefinitions};
pub use native::{NativeApi, NativeService};
pub use script::{ScriptApi, ScriptService};
pub use worker::{WorkerApi, WorkerService};

use crate::plugin::ServiceSet;

/// A registry holding the built-in transports.
#[must_use]
pub fn builtin() -> ServiceSet {
    let services = ServiceSet::new();
    services.register(ScriptService::new());
    services.register(WorkerService::new());
    services.register(NativeService::new());
    services.register(HttpService::new());
    services
}
