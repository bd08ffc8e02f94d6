use std::sync::Arc;

use keel_core::{Attribute, ErrorApi, ServiceError};

use crate::plugin::FeatureSet;

/// Finds the first enabled feature providing `T`.
///
/// Shared by field injection during bootstrap and by
/// [`ServiceApi::feature`](crate::handler::ServiceApi) lookups from
/// lifecycle hooks.
///
/// # Errors
///
/// Submits and returns an internal error through `errors` when no feature
/// provides `T`.
pub fn resolve<T>(features: &FeatureSet, errors: &dyn ErrorApi) -> Result<Arc<T>, ServiceError>
where
    T: ?Sized + Send + Sync + 'static,
{
    features.resolve::<T>().ok_or_else(|| {
        errors
            .internal(&"could not find feature that supports this requested API")
            .with_attributes([Attribute::string("api", std::any::type_name::<T>())])
            .submit()
    })
}

#[cfg(test)]
mod tests {
    use keel_core::{ErrorFactory, ErrorKind};

    use super::*;

    trait Missing: std::fmt::Debug + Send + Sync {}

    #[test]
    fn unresolved_api_is_an_internal_error() {
        let features = FeatureSet::new();
        let errors = ErrorFactory::silent("orders");

        let err = resolve::<dyn Missing>(&features, &errors).unwrap_err();

        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.service_name, "orders");
        assert!(err.details.contains("could not find feature"));
    }
}
