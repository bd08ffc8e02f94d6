//! User-facing error taxonomy.
//!
//! Handler code classifies failures through an [`ErrorApi`] implementation
//! (normally [`ErrorFactory`]). Submitting a built error logs it at the
//! severity chosen by its [`ErrorKind`] and yields a [`ServiceError`], the
//! serializable value transports hand back to callers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::attribute::Attribute;
use crate::logger::{Level, LoggerApi};

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Classification of a [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "InternalError")]
    Internal,
    #[serde(rename = "NotFoundError")]
    NotFound,
    /// Failed precondition.
    #[serde(rename = "ConditionError")]
    Condition,
    #[serde(rename = "PermissionError")]
    Permission,
    #[serde(rename = "RPCError")]
    Rpc,
    /// Propagated as an internal error.
    #[serde(rename = "CustomError")]
    Custom,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::Internal => "InternalError",
            Self::NotFound => "NotFoundError",
            Self::Condition => "ConditionError",
            Self::Permission => "PermissionError",
            Self::Rpc => "RPCError",
            Self::Custom => "CustomError",
        }
    }

    /// Severity used when an error of this kind is submitted.
    #[must_use]
    pub fn severity(self) -> Level {
        match self {
            Self::Internal | Self::Rpc => Level::Error,
            Self::Validation | Self::Condition | Self::NotFound => Level::Warn,
            Self::Permission | Self::Custom => Level::Info,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ServiceError
// ---------------------------------------------------------------------------

/// Stable, serializable error value returned to a transport's caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceError {
    #[serde(default)]
    pub code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub destination: String,
    pub kind: ErrorKind,
    /// Text of the lower-level error that caused this one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl ServiceError {
    #[must_use]
    pub fn new(kind: ErrorKind, service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: 0,
            service_name: service_name.into(),
            message: message.into(),
            destination: String::new(),
            kind,
            details: String::new(),
        }
    }

    /// Decodes an error produced by another service.
    ///
    /// `from` is the service that received the error and `to` the one that
    /// produced it. Payloads that are not a serialized [`ServiceError`] are
    /// wrapped into an [`ErrorKind::Internal`] error carrying the raw text.
    #[must_use]
    pub fn from_remote(payload: &str, from: &str, to: &str) -> Self {
        match serde_json::from_str::<Self>(payload) {
            Ok(mut err) => {
                if err.destination.is_empty() {
                    err.destination = to.to_string();
                }
                err
            }
            Err(_) => {
                let mut err = Self::new(ErrorKind::Internal, from, "got an internal error");
                err.destination = to.to_string();
                err.details = payload.to_string();
                err
            }
        }
    }

    /// JSON form of the error. Serialization of this type cannot fail, the
    /// fallback only guards against a broken writer.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"kind\":\"{}\"}}", self.kind))
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

impl std::error::Error for ServiceError {}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// A service-specific numeric code attached to an error.
pub trait ErrorCode {
    fn error_code(&self) -> i32;
}

impl ErrorCode for i32 {
    fn error_code(&self) -> i32 {
        *self
    }
}

// ---------------------------------------------------------------------------
// ErrorBuilder
// ---------------------------------------------------------------------------

/// An error under construction. Nothing is logged until [`submit`](Self::submit).
#[must_use = "an error is only logged when submitted"]
pub struct ErrorBuilder {
    error: ServiceError,
    attributes: Vec<Attribute>,
    logger: Option<Arc<dyn LoggerApi>>,
}

impl ErrorBuilder {
    pub fn with_code(mut self, code: &dyn ErrorCode) -> Self {
        self.error.code = code.error_code();
        self
    }

    pub fn with_attributes(mut self, attrs: impl IntoIterator<Item = Attribute>) -> Self {
        self.attributes.extend(attrs);
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }

    /// Logs the error at its kind's severity and returns the final value.
    pub fn submit(self) -> ServiceError {
        let Self {
            error,
            mut attributes,
            logger,
        } = self;

        if let Some(logger) = logger {
            attributes.push(Attribute::string("error.kind", error.kind.as_str()));
            if !error.details.is_empty() {
                attributes.push(Attribute::string("error.message", error.details.clone()));
            }
            if error.code != 0 {
                attributes.push(Attribute::int("error.code", i64::from(error.code)));
            }
            logger.log(error.kind.severity(), &error.message, &attributes);
        }

        error
    }
}

// ---------------------------------------------------------------------------
// ErrorApi / ErrorFactory
// ---------------------------------------------------------------------------

/// Classifies failures into the service error taxonomy.
pub trait ErrorApi: Send + Sync {
    /// A failed call to another service.
    fn rpc(&self, err: &dyn fmt::Display, destination: &str) -> ErrorBuilder;
    /// Request validation failure.
    fn invalid_argument(&self, err: &dyn fmt::Display) -> ErrorBuilder;
    fn failed_precondition(&self, message: &str) -> ErrorBuilder;
    fn not_found(&self) -> ErrorBuilder;
    fn internal(&self, err: &dyn fmt::Display) -> ErrorBuilder;
    fn permission_denied(&self) -> ErrorBuilder;
    fn custom(&self, message: &str) -> ErrorBuilder;
}

/// Default [`ErrorApi`], stamping every error with the service name and
/// logging through the service logger.
pub struct ErrorFactory {
    service_name: String,
    logger: Option<Arc<dyn LoggerApi>>,
}

impl ErrorFactory {
    #[must_use]
    pub fn new(service_name: impl Into<String>, logger: Arc<dyn LoggerApi>) -> Self {
        Self {
            service_name: service_name.into(),
            logger: Some(logger),
        }
    }

    /// A factory that builds errors without logging them.
    #[must_use]
    pub fn silent(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            logger: None,
        }
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn build(&self, kind: ErrorKind, message: impl Into<String>) -> ErrorBuilder {
        ErrorBuilder {
            error: ServiceError::new(kind, self.service_name.clone(), message),
            attributes: Vec::new(),
            logger: self.logger.clone(),
        }
    }

    fn build_with_details(&self, kind: ErrorKind, message: &str, details: &dyn fmt::Display) -> ErrorBuilder {
        let mut builder = self.build(kind, message);
        builder.error.details = details.to_string();
        builder
    }
}

impl ErrorApi for ErrorFactory {
    fn rpc(&self, err: &dyn fmt::Display, destination: &str) -> ErrorBuilder {
        let mut builder = self.build_with_details(ErrorKind::Rpc, "service RPC error", err);
        builder.error.destination = destination.to_string();
        builder
    }

    fn invalid_argument(&self, err: &dyn fmt::Display) -> ErrorBuilder {
        self.build_with_details(ErrorKind::Validation, "request validation failed", err)
    }

    fn failed_precondition(&self, message: &str) -> ErrorBuilder {
        self.build(ErrorKind::Condition, message)
    }

    fn not_found(&self) -> ErrorBuilder {
        self.build(ErrorKind::NotFound, "not found")
    }

    fn internal(&self, err: &dyn fmt::Display) -> ErrorBuilder {
        self.build_with_details(ErrorKind::Internal, "got an internal error", err)
    }

    fn permission_denied(&self) -> ErrorBuilder {
        let message = format!("no permission to access {}", self.service_name);
        self.build(ErrorKind::Permission, message)
    }

    fn custom(&self, message: &str) -> ErrorBuilder {
        self.build(ErrorKind::Custom, message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::logger::ParseLevelError;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<(Level, String, Vec<Attribute>)>>,
    }

    impl LoggerApi for Recorder {
        fn log(&self, level: Level, msg: &str, attrs: &[Attribute]) {
            self.lines
                .lock()
                .unwrap()
                .push((level, msg.to_string(), attrs.to_vec()));
        }

        fn set_level(&self, _level: &str) -> Result<Level, ParseLevelError> {
            Ok(Level::Info)
        }

        fn level(&self) -> Level {
            Level::Debug
        }
    }

    fn factory() -> (ErrorFactory, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (ErrorFactory::new("orders", recorder.clone()), recorder)
    }

    #[test]
    fn kinds_serialize_with_taxonomy_names() {
        let json = serde_json::to_string(&ErrorKind::Condition).unwrap();
        assert_eq!(json, "\"ConditionError\"");
        let kind: ErrorKind = serde_json::from_str("\"RPCError\"").unwrap();
        assert_eq!(kind, ErrorKind::Rpc);
    }

    #[test]
    fn severity_follows_kind() {
        assert_eq!(ErrorKind::Internal.severity(), Level::Error);
        assert_eq!(ErrorKind::Rpc.severity(), Level::Error);
        assert_eq!(ErrorKind::Validation.severity(), Level::Warn);
        assert_eq!(ErrorKind::Condition.severity(), Level::Warn);
        assert_eq!(ErrorKind::Permission.severity(), Level::Info);
    }

    #[test]
    fn submit_logs_with_classification() {
        let (factory, recorder) = factory();
        let err = factory.internal(&"db down").submit();

        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.service_name, "orders");
        assert_eq!(err.details, "db down");

        let lines = recorder.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        let (level, msg, attrs) = &lines[0];
        assert_eq!(*level, Level::Error);
        assert_eq!(msg, "got an internal error");
        assert!(attrs.contains(&Attribute::string("error.kind", "InternalError")));
        assert!(attrs.contains(&Attribute::string("error.message", "db down")));
    }

    #[test]
    fn builder_options_reach_the_value() {
        let (factory, recorder) = factory();
        let err = factory
            .rpc(&"connection refused", "billing")
            .with_code(&42)
            .with_attributes([Attribute::string("order.id", "o-1")])
            .submit();

        assert_eq!(err.code, 42);
        assert_eq!(err.destination, "billing");

        let lines = recorder.lines.lock().unwrap();
        assert!(lines[0].2.contains(&Attribute::string("order.id", "o-1")));
        assert!(lines[0].2.contains(&Attribute::int("error.code", 42)));
    }

    #[test]
    fn nothing_is_logged_before_submit() {
        let (factory, recorder) = factory();
        let builder = factory.not_found();
        assert_eq!(builder.kind(), ErrorKind::NotFound);
        assert!(recorder.lines.lock().unwrap().is_empty());
    }

    #[test]
    fn permission_denied_names_the_service() {
        let err = ErrorFactory::silent("orders").permission_denied().submit();
        assert_eq!(err.message, "no permission to access orders");
    }

    #[test]
    fn display_is_json() {
        let err = ErrorFactory::silent("orders").custom("quota exceeded").submit();
        let decoded: serde_json::Value = serde_json::from_str(&err.to_string()).unwrap();
        assert_eq!(decoded["kind"], "CustomError");
        assert_eq!(decoded["service_name"], "orders");
        assert_eq!(decoded["message"], "quota exceeded");
    }

    #[test]
    fn from_remote_decodes_service_errors() {
        let original = ErrorFactory::silent("billing").not_found().submit();
        let decoded = ServiceError::from_remote(&original.to_string(), "orders", "billing");
        assert_eq!(decoded.kind, ErrorKind::NotFound);
        assert_eq!(decoded.service_name, "billing");
        assert_eq!(decoded.destination, "billing");
    }

    #[test]
    fn from_remote_wraps_unknown_payloads() {
        let decoded = ServiceError::from_remote("upstream connect error", "orders", "billing");
        assert_eq!(decoded.kind, ErrorKind::Internal);
        assert_eq!(decoded.service_name, "orders");
        assert_eq!(decoded.details, "upstream connect error");
    }
}
