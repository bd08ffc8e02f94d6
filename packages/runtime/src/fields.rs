//! Framework-managed fields of the service object.
//!
//! A service lists the fields the runtime may touch through
//! [`ServiceHandler::fields`](crate::handler::ServiceHandler::fields). Each
//! [`Field`] pairs the field's name and annotation with a mutable view of
//! the field itself, a [`FieldSlot`]. The annotation decides what bootstrap
//! does with the slot:
//!
//! - `feature`: filled with the first enabled feature providing the slot's
//!   API ([`Inject`]);
//! - `definitions`: filled with the decoded `[service]` block
//!   ([`ServiceDefinitions`]);
//! - `grpc_client=<binding>`: filled with an outbound client ([`Client`]);
//! - `skip`: left out of the completeness check.
//!
//! Every other listed field must be set by the time bootstrap finishes.

use std::sync::Arc;

use keel_core::definition::CustomDefinitions;
use keel_core::{DefinitionError, Definitions, ErrorApi, ServiceError, Tag};

use crate::client::{ClientConnection, ClientDescriptor};
use crate::error::{ClientError, ValidationError};
use crate::plugin::FeatureSet;
use crate::resolver;

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

pub struct Field<'a> {
    pub name: &'static str,
    /// `None` when the field carries no annotation.
    pub tag: Option<Tag>,
    pub slot: &'a mut dyn FieldSlot,
}

impl<'a> Field<'a> {
    /// An unannotated field, checked for completeness only.
    pub fn new(name: &'static str, slot: &'a mut dyn FieldSlot) -> Self {
        Self {
            name,
            tag: None,
            slot,
        }
    }

    pub fn tagged(name: &'static str, tag: &str, slot: &'a mut dyn FieldSlot) -> Self {
        Self {
            name,
            tag: Tag::from_annotation(Some(tag)),
            slot,
        }
    }

    fn tag(&self) -> Tag {
        self.tag.clone().unwrap_or_default()
    }
}

impl std::fmt::Debug for Field<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("initialized", &self.slot.is_initialized())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// A field the runtime can inspect and, depending on its kind, fill.
pub trait FieldSlot: Send {
    /// `false` while the field still holds its empty value.
    fn is_initialized(&self) -> bool;

    fn as_injectable(&mut self) -> Option<&mut dyn Injectable> {
        None
    }

    fn as_definitions(&mut self) -> Option<&mut dyn DefinitionsSlot> {
        None
    }

    fn as_client(&mut self) -> Option<&mut dyn ClientSlot> {
        None
    }
}

pub trait Injectable {
    /// # Errors
    ///
    /// Returns the internal error submitted when no feature provides the
    /// slot's API.
    fn inject(&mut self, features: &FeatureSet, errors: &dyn ErrorApi) -> Result<(), ServiceError>;
}

pub trait DefinitionsSlot {
    /// # Errors
    ///
    /// Returns an error if the `[service]` block cannot be decoded or fails
    /// its own validation.
    fn load(&mut self, defs: &Definitions) -> Result<(), DefinitionError>;
}

pub trait ClientSlot {
    /// # Errors
    ///
    /// Returns [`ClientError::TypeMismatch`] if `descriptor` builds another
    /// client type.
    fn bind(
        &mut self,
        binding: &str,
        descriptor: &dyn ClientDescriptor,
        connection: ClientConnection,
    ) -> Result<(), ClientError>;
}

/// A feature API resolved during bootstrap.
pub struct Inject<T: ?Sized>(Option<Arc<T>>);

impl<T: ?Sized> Inject<T> {
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.0.as_deref()
    }

    #[must_use]
    pub fn cloned(&self) -> Option<Arc<T>> {
        self.0.clone()
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl<T: ?Sized> Default for Inject<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T: ?Sized> From<Arc<T>> for Inject<T> {
    fn from(api: Arc<T>) -> Self {
        Self(Some(api))
    }
}

impl<T> FieldSlot for Inject<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    fn is_initialized(&self) -> bool {
        self.0.is_some()
    }

    fn as_injectable(&mut self) -> Option<&mut dyn Injectable> {
        Some(self)
    }
}

impl<T> Injectable for Inject<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    fn inject(&mut self, features: &FeatureSet, errors: &dyn ErrorApi) -> Result<(), ServiceError> {
        self.0 = Some(resolver::resolve::<T>(features, errors)?);
        Ok(())
    }
}

/// The decoded `[service]` block of the definitions.
pub struct ServiceDefinitions<T>(Option<T>);

impl<T> ServiceDefinitions<T> {
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }
}

impl<T> Default for ServiceDefinitions<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T: CustomDefinitions> FieldSlot for ServiceDefinitions<T> {
    fn is_initialized(&self) -> bool {
        self.0.is_some()
    }

    fn as_definitions(&mut self) -> Option<&mut dyn DefinitionsSlot> {
        Some(self)
    }
}

impl<T: CustomDefinitions> DefinitionsSlot for ServiceDefinitions<T> {
    fn load(&mut self, defs: &Definitions) -> Result<(), DefinitionError> {
        self.0 = Some(defs.load_custom_definitions::<T>()?);
        Ok(())
    }
}

/// An outbound client coupled during bootstrap.
pub struct Client<T>(Option<T>);

impl<T> Client<T> {
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }
}

impl<T> Default for Client<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T: Send + 'static> FieldSlot for Client<T> {
    fn is_initialized(&self) -> bool {
        self.0.is_some()
    }

    fn as_client(&mut self) -> Option<&mut dyn ClientSlot> {
        Some(self)
    }
}

impl<T: Send + 'static> ClientSlot for Client<T> {
    fn bind(
        &mut self,
        binding: &str,
        descriptor: &dyn ClientDescriptor,
        connection: ClientConnection,
    ) -> Result<(), ClientError> {
        let client = descriptor
            .as_any()
            .downcast_ref::<crate::client::GrpcClient<T>>()
            .ok_or_else(|| ClientError::TypeMismatch(binding.to_string()))?;
        self.0 = Some((client.new_client)(connection));
        Ok(())
    }
}

// -- plain values --

impl FieldSlot for String {
    fn is_initialized(&self) -> bool {
        !self.is_empty()
    }
}

impl FieldSlot for bool {
    fn is_initialized(&self) -> bool {
        *self
    }
}

macro_rules! numeric_slot {
    ($($ty:ty),*) => {
        $(
            impl FieldSlot for $ty {
                fn is_initialized(&self) -> bool {
                    *self != 0
                }
            }
        )*
    };
}

numeric_slot!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl<T: Send> FieldSlot for Option<T> {
    fn is_initialized(&self) -> bool {
        self.is_some()
    }
}

impl<T: Send> FieldSlot for Vec<T> {
    fn is_initialized(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: ?Sized + Send + Sync> FieldSlot for Arc<T> {
    fn is_initialized(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Bootstrap passes
// ---------------------------------------------------------------------------

/// Loads the `[service]` block into every `definitions` field.
///
/// # Errors
///
/// Returns the first decoding or validation failure.
pub fn load_definitions(fields: &mut [Field<'_>], defs: &Definitions) -> Result<(), DefinitionError> {
    for field in fields.iter_mut().filter(|f| f.tag().is_definitions) {
        if let Some(slot) = field.slot.as_definitions() {
            slot.load(defs)?;
        }
    }
    Ok(())
}

/// Resolves every `feature` field.
///
/// # Errors
///
/// Returns the [`ServiceError`] of the first field whose API no enabled
/// feature provides, or [`ValidationError::NotInjectable`] for a `feature`
/// field that cannot hold an API.
pub fn inject_features(
    service: &str,
    fields: &mut [Field<'_>],
    features: &FeatureSet,
    errors: &dyn ErrorApi,
) -> anyhow::Result<()> {
    for field in fields.iter_mut().filter(|f| f.tag().is_feature) {
        let name = field.name;
        let slot = field.slot.as_injectable().ok_or_else(|| ValidationError::NotInjectable {
            service: service.to_string(),
            field: name.to_string(),
        })?;
        slot.inject(features, errors)?;
    }
    Ok(())
}

/// Checks that every listed field is set, except `skip` fields and
/// client-bound ones.
///
/// # Errors
///
/// Returns a [`ValidationError`] naming the first empty field.
pub fn validate(service: &str, fields: &[Field<'_>]) -> Result<(), ValidationError> {
    for field in fields {
        let tag = field.tag();
        if tag.is_optional || tag.grpc_client.is_some() {
            continue;
        }
        if !field.slot.is_initialized() {
            return Err(ValidationError::Missing {
                service: service.to_string(),
                field: field.name.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use keel_core::ErrorFactory;
    use serde::Deserialize;

    use super::*;
    use crate::client::GrpcClient;

    #[derive(Debug, Deserialize)]
    struct Settings {
        region: String,
    }

    impl CustomDefinitions for Settings {
        fn validate(&self) -> anyhow::Result<()> {
            anyhow::ensure!(!self.region.is_empty(), "region must be set");
            Ok(())
        }
    }

    trait Clock: Send + Sync {}

    #[derive(Default)]
    struct Handler {
        clock: Inject<dyn Clock>,
        settings: ServiceDefinitions<Settings>,
        billing: Client<String>,
        label: String,
        retries: u32,
        cache: Option<Vec<u8>>,
    }

    impl Handler {
        fn fields(&mut self) -> Vec<Field<'_>> {
            vec![
                Field::tagged("clock", "feature,skip", &mut self.clock),
                Field::tagged("settings", "definitions", &mut self.settings),
                Field::tagged("billing", "grpc_client=billing", &mut self.billing),
                Field::new("label", &mut self.label),
                Field::new("retries", &mut self.retries),
                Field::tagged("cache", "skip", &mut self.cache),
            ]
        }
    }

    #[test]
    fn validation_reports_first_empty_field() {
        let mut handler = Handler::default();
        let err = validate("orders", &handler.fields()).unwrap_err();
        assert_eq!(err.field(), "settings");
        assert_eq!(
            err.to_string(),
            "could not initiate struct orders, value from field settings is missing"
        );
    }

    #[test]
    fn validation_skips_optional_and_client_fields() {
        let mut handler = Handler {
            label: "orders".into(),
            retries: 3,
            ..Handler::default()
        };
        handler.settings = ServiceDefinitions(Some(Settings {
            region: "eu".into(),
        }));

        assert!(validate("orders", &handler.fields()).is_ok());
    }

    #[test]
    fn definitions_are_loaded_and_validated() {
        let mut defs = Definitions::default();
        defs.service.insert("region".into(), toml::Value::String("eu".into()));

        let mut handler = Handler::default();
        load_definitions(&mut handler.fields(), &defs).unwrap();
        assert_eq!(handler.settings.get().unwrap().region, "eu");

        defs.service.insert("region".into(), toml::Value::String(String::new()));
        assert!(matches!(
            load_definitions(&mut handler.fields(), &defs),
            Err(DefinitionError::Custom(_))
        ));
    }

    #[test]
    fn unresolvable_feature_fails_injection() {
        let mut handler = Handler::default();
        let err = inject_features(
            "orders",
            &mut handler.fields(),
            &FeatureSet::new(),
            &ErrorFactory::silent("orders"),
        )
        .unwrap_err();
        let err = err.downcast_ref::<ServiceError>().unwrap();
        assert!(err.details.contains("could not find feature"));
    }

    #[test]
    fn feature_tag_on_plain_value_is_rejected() {
        #[derive(Default)]
        struct Mistagged {
            label: String,
        }

        let mut handler = Mistagged::default();
        let fields = &mut [Field::tagged("label", "feature", &mut handler.label)];
        let err = inject_features("orders", fields, &FeatureSet::new(), &ErrorFactory::silent("orders"))
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::NotInjectable {
                service: "orders".into(),
                field: "label".into(),
            })
        );
    }

    #[test]
    fn client_binding_checks_type() {
        let conn = ClientConnection {
            service_name: "billing".into(),
            host: "billing".into(),
            port: 7070,
        };

        let mut client = Client::<String>::default();
        let wrong = GrpcClient::new("billing", |_| 42_u32);
        assert!(matches!(
            client.bind("billing", &wrong, conn.clone()),
            Err(ClientError::TypeMismatch(_))
        ));

        let right = GrpcClient::new("billing", |conn: ClientConnection| conn.endpoint());
        client.bind("billing", &right, conn).unwrap();
        assert_eq!(client.get().map(String::as_str), Some("billing:7070"));
    }
}
