//! Feature and transport plugins and their registries.

pub mod feature;
pub mod feature_set;
pub mod service;
pub mod service_set;

pub use feature::{
    CanBeInitializedOptions, Feature, FeatureController, FeatureEntry, FeatureSettings,
    FeatureTester, InitializeOptions, UpdateInfo,
};
pub use feature_set::FeatureSet;
pub use service::{Service, ServiceOptions, ServiceSettings};
pub use service_set::ServiceSet;
