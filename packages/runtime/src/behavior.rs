//! Framework-facing APIs.
//!
//! Features publish these through [`Feature::framework_api`] so the runtime
//! can pick them up during bootstrap. Each one is looked up under a fixed
//! feature name.
//!
//! Request-scoped hooks receive the request context as [`Extensions`]; see
//! [`request_context`](crate::request_context).
//!
//! [`Feature::framework_api`]: crate::plugin::Feature::framework_api

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use http::header::{HeaderName, HeaderValue};
use http::{Extensions, Method};
use keel_core::Attribute;
use tower_http::cors::{self, CorsLayer};

// ---------------------------------------------------------------------------
// Tracking
// ---------------------------------------------------------------------------

/// Tracking identifier of the request being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackId(pub String);

/// Generates and carries request tracking identifiers. Looked up under
/// `keel-tracker`.
pub trait Tracker: Send + Sync {
    fn generate(&self) -> String;

    /// Stores `id` in the request context.
    fn add(&self, ctx: &mut Extensions, id: String) {
        ctx.insert(TrackId(id));
    }

    /// The identifier stored by [`add`](Self::add), if any.
    fn retrieve(&self, ctx: &Extensions) -> Option<String> {
        ctx.get::<TrackId>().map(|id| id.0.clone())
    }
}

/// Random v4 UUIDs, used when no tracker feature is enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidTracker;

impl Tracker for UuidTracker {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Adds attributes to every log line. Looked up under
/// `keel-logger_extractor`.
pub trait LoggerExtractor: Send + Sync {
    /// Attributes taken from the current request context, which is empty
    /// when the line is not logged on behalf of a request.
    fn extract(&self, ctx: &Extensions) -> Vec<Attribute>;
}

/// Measures every request. Looked up under `keel-tracing`.
pub trait Tracer: Send + Sync {
    /// Called before the request is handled. The returned value is handed
    /// back to [`compute_metrics`](Self::compute_metrics) unchanged.
    ///
    /// # Errors
    ///
    /// A failure is logged and the request is served unmeasured.
    fn start_measurements(&self, ctx: &Extensions, service: &str) -> anyhow::Result<Box<dyn Any + Send>>;

    /// Called once the handler returned.
    ///
    /// # Errors
    ///
    /// A failure is logged; the response is sent regardless.
    fn compute_metrics(&self, ctx: &Extensions, service: &str, data: Box<dyn Any + Send>) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Guards the http transport's routes. Looked up under `keel-http_auth`.
#[async_trait]
pub trait HttpAuthenticator: Send + Sync {
    /// Lets the request through, possibly adding extensions for the
    /// handler, or answers it directly.
    async fn authenticate(&self, request: &mut Request) -> Result<(), Response>;
}

/// Told about every panicking request handler. Looked up under
/// `keel-panic_recovery`.
pub trait Recovery: Send + Sync {
    fn recover(&self, ctx: &Extensions, message: &str);
}

/// CORS policy of the http transport. Looked up under `keel-http_cors`.
pub trait CorsHandler: Send + Sync {
    fn cors(&self) -> CorsOptions;
}

/// Cross-origin policy. `*` in a list allows anything.
#[derive(Debug, Clone, Default)]
pub struct CorsOptions {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorsError {
    #[error("invalid CORS origin '{0}'")]
    InvalidOrigin(String),

    #[error("invalid CORS method '{0}'")]
    InvalidMethod(String),

    #[error("invalid CORS header '{0}'")]
    InvalidHeader(String),

    #[error("CORS credentials cannot be combined with a wildcard {0}")]
    CredentialsWithWildcard(&'static str),
}

fn is_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v == "*")
}

fn header_names(values: &[String]) -> Result<Vec<HeaderName>, CorsError> {
    values
        .iter()
        .map(|v| HeaderName::try_from(v.as_str()).map_err(|_| CorsError::InvalidHeader(v.clone())))
        .collect()
}

impl CorsOptions {
    /// Builds the tower layer.
    ///
    /// # Errors
    ///
    /// Returns a [`CorsError`] for unparsable entries and for credentials
    /// combined with a wildcard, which browsers reject.
    pub fn layer(&self) -> Result<CorsLayer, CorsError> {
        if self.allow_credentials {
            let lists = [
                ("origin", &self.allowed_origins),
                ("method", &self.allowed_methods),
                ("header", &self.allowed_headers),
                ("exposed header", &self.exposed_headers),
            ];
            if let Some((what, _)) = lists.iter().find(|(_, values)| is_wildcard(values)) {
                return Err(CorsError::CredentialsWithWildcard(what));
            }
        }

        let mut layer = CorsLayer::new().allow_credentials(self.allow_credentials);

        if is_wildcard(&self.allowed_origins) {
            layer = layer.allow_origin(cors::Any);
        } else if !self.allowed_origins.is_empty() {
            let origins = self
                .allowed_origins
                .iter()
                .map(|origin| {
                    HeaderValue::try_from(origin.as_str())
                        .ok()
                        .filter(|_| origin.contains("://"))
                        .ok_or_else(|| CorsError::InvalidOrigin(origin.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            layer = layer.allow_origin(origins);
        }

        if is_wildcard(&self.allowed_methods) {
            layer = layer.allow_methods(cors::Any);
        } else if !self.allowed_methods.is_empty() {
            let methods = self
                .allowed_methods
                .iter()
                .map(|m| Method::from_bytes(m.as_bytes()).map_err(|_| CorsError::InvalidMethod(m.clone())))
                .collect::<Result<Vec<_>, _>>()?;
            layer = layer.allow_methods(methods);
        }

        if is_wildcard(&self.allowed_headers) {
            layer = layer.allow_headers(cors::Any);
        } else if !self.allowed_headers.is_empty() {
            layer = layer.allow_headers(header_names(&self.allowed_headers)?);
        }

        if is_wildcard(&self.exposed_headers) {
            layer = layer.expose_headers(cors::Any);
        } else if !self.exposed_headers.is_empty() {
            layer = layer.expose_headers(header_names(&self.exposed_headers)?);
        }

        if let Some(secs) = self.max_age_secs {
            layer = layer.max_age(Duration::from_secs(secs));
        }

        Ok(layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn uuid_tracker_generates_distinct_ids() {
        let a = UuidTracker.generate();
        let b = UuidTracker.generate();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn tracker_ids_round_trip_through_context() {
        let mut ctx = Extensions::new();
        assert_eq!(UuidTracker.retrieve(&ctx), None);

        UuidTracker.add(&mut ctx, "req-7".into());
        assert_eq!(UuidTracker.retrieve(&ctx).as_deref(), Some("req-7"));
        assert_eq!(ctx.get::<TrackId>(), Some(&TrackId("req-7".into())));
    }

    #[test]
    fn valid_cors_options_build_a_layer() {
        let options = CorsOptions {
            allowed_origins: strings(&["https://shop.example"]),
            allowed_methods: strings(&["GET", "POST"]),
            allowed_headers: strings(&["authorization"]),
            allow_credentials: true,
            max_age_secs: Some(600),
            ..CorsOptions::default()
        };
        assert!(options.layer().is_ok());

        let open = CorsOptions {
            allowed_origins: strings(&["*"]),
            allowed_headers: strings(&["*"]),
            ..CorsOptions::default()
        };
        assert!(open.layer().is_ok());
    }

    #[test]
    fn credentials_with_wildcard_are_rejected() {
        let options = CorsOptions {
            allowed_origins: strings(&["*"]),
            allow_credentials: true,
            ..CorsOptions::default()
        };
        assert_eq!(options.layer().unwrap_err(), CorsError::CredentialsWithWildcard("origin"));
    }

    #[test]
    fn malformed_entries_are_rejected() {
        let origin = CorsOptions {
            allowed_origins: strings(&["shop.example"]),
            ..CorsOptions::default()
        };
        assert_eq!(origin.layer().unwrap_err(), CorsError::InvalidOrigin("shop.example".into()));

        let header = CorsOptions {
            allowed_headers: strings(&["x bad"]),
            ..CorsOptions::default()
        };
        assert_eq!(header.layer().unwrap_err(), CorsError::InvalidHeader("x bad".into()));

        let method = CorsOptions {
            allowed_methods: strings(&["GE T"]),
            ..CorsOptions::default()
        };
        assert_eq!(method.layer().unwrap_err(), CorsError::InvalidMethod("GE T".into()));
    }
}
