//! Features every service gets.

pub mod definition;
pub mod env;
pub mod errors;
pub mod http;
pub mod logger;

pub use definition::{DefinitionApi, DefinitionFeature};
pub use env::EnvFeature;
pub use errors::ErrorsFeature;
pub use http::{HttpFeature, HttpServerApi, ResponseContext};
pub use logger::LoggerFeature;

use crate::plugin::FeatureSet;

/// A registry holding the built-in features.
#[must_use]
pub fn builtin() -> FeatureSet {
    let features = FeatureSet::new();
    features.register(HttpFeature::new());
    features.register(LoggerFeature::new());
    features.register(ErrorsFeature::new());
    features.register(DefinitionFeature::new());
    features.register(EnvFeature::new());
    features
}
