//! Response customization for HTTP handlers.
//!
//! The http transport attaches a [`ResponseContext`] to every request as an
//! extension. Handlers record headers and a status code on it through
//! [`HttpServerApi`], and the transport applies them to the response the
//! handler returns.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use keel_core::definition::ExternalFeatureEntry;
use keel_core::{Attribute, Definitions, ServiceKind};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::api::ApiSet;
use crate::plugin::feature::HTTP_FEATURE_NAME;
use crate::plugin::{
    CanBeInitializedOptions, Feature, FeatureEntry, FeatureSettings, InitializeOptions,
};

// ---------------------------------------------------------------------------
// ResponseContext
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ResponseChanges {
    headers: Vec<(String, String)>,
    status: Option<u16>,
}

/// Per-request response changes recorded by a handler.
#[derive(Debug, Clone, Default)]
pub struct ResponseContext(Arc<Mutex<ResponseChanges>>);

impl ResponseContext {
    /// Applies the recorded changes to `response`. Invalid header names,
    /// values or status codes are skipped.
    pub fn apply(&self, response: &mut Response) {
        let changes = std::mem::take(&mut *self.0.lock());

        for (key, value) in changes.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().append(name, value);
            }
        }

        if let Some(status) = changes.status.and_then(|code| StatusCode::from_u16(code).ok()) {
            *response.status_mut() = status;
        }
    }
}

/// Lets handlers adjust the response of the current request.
pub trait HttpServerApi: Send + Sync {
    /// Appends a response header. Repeated keys keep every value.
    fn add_response_header(&self, ctx: &ResponseContext, key: &str, value: &str);

    /// Overrides the default `200 OK` status.
    fn set_response_code(&self, ctx: &ResponseContext, code: u16);
}

// ---------------------------------------------------------------------------
// HttpFeature
// ---------------------------------------------------------------------------

/// `[features.keel-http]` block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpFeatureDefinitions {
    /// Headers added to every response.
    pub headers: BTreeMap<String, String>,
}

impl ExternalFeatureEntry for HttpFeatureDefinitions {
    fn enabled(&self) -> bool {
        true
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (key, value) in &self.headers {
            HeaderName::try_from(key.as_str())
                .map_err(|e| anyhow::anyhow!("invalid header name '{key}': {e}"))?;
            HeaderValue::try_from(value.as_str())
                .map_err(|e| anyhow::anyhow!("invalid value for header '{key}': {e}"))?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Enabled for services running the `http` transport.
pub struct HttpFeature {
    entry: FeatureEntry,
    definitions: Mutex<HttpFeatureDefinitions>,
}

impl HttpFeature {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entry: FeatureEntry::new(HTTP_FEATURE_NAME),
            definitions: Mutex::new(HttpFeatureDefinitions::default()),
        }
    }

    /// Headers configured for every response.
    #[must_use]
    pub fn default_headers(&self) -> BTreeMap<String, String> {
        self.definitions.lock().headers.clone()
    }
}

impl Default for HttpFeature {
    fn default() -> Self {
        Self::new()
    }
}

/// Records changes on the request's [`ResponseContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseWriter;

impl HttpServerApi for ResponseWriter {
    fn add_response_header(&self, ctx: &ResponseContext, key: &str, value: &str) {
        ctx.0.lock().headers.push((key.to_string(), value.to_string()));
    }

    fn set_response_code(&self, ctx: &ResponseContext, code: u16) {
        ctx.0.lock().status = Some(code);
    }
}

#[async_trait]
impl Feature for HttpFeature {
    fn entry(&self) -> &FeatureEntry {
        &self.entry
    }

    fn can_be_initialized(&self, options: &CanBeInitializedOptions<'_>) -> bool {
        options.definitions.is_service_type(&ServiceKind::HTTP)
    }

    async fn initialize(&self, options: &InitializeOptions) -> anyhow::Result<()> {
        let definitions = options
            .definitions
            .external_feature_definitions(HTTP_FEATURE_NAME)
            .ok()
            .and_then(|entry| entry.as_any().downcast_ref::<HttpFeatureDefinitions>().cloned())
            .unwrap_or_default();
        *self.definitions.lock() = definitions;
        Ok(())
    }

    fn fields(&self) -> Vec<Attribute> {
        let headers = self.definitions.lock().headers.len();
        vec![Attribute::uint("http.default_headers", headers as u64)]
    }

    fn service_api(&self) -> Option<ApiSet> {
        Some(ApiSet::new().with::<dyn HttpServerApi>(Arc::new(ResponseWriter)))
    }

    fn settings(&self) -> Option<&dyn FeatureSettings> {
        Some(self)
    }
}

impl FeatureSettings for HttpFeature {
    fn definitions(&self, definitions: &Definitions) -> anyhow::Result<Arc<dyn ExternalFeatureEntry>> {
        let block: HttpFeatureDefinitions = definitions.decode_feature_block(HTTP_FEATURE_NAME)?;
        Ok(Arc::new(block))
    }
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;

    use super::*;

    #[test]
    fn recorded_changes_are_applied() {
        let ctx = ResponseContext::default();
        ResponseWriter.add_response_header(&ctx, "x-order-id", "42");
        ResponseWriter.add_response_header(&ctx, "bad header", "ignored");
        ResponseWriter.set_response_code(&ctx, 201);

        let mut response = "ok".into_response();
        ctx.apply(&mut response);

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-order-id"], "42");
        assert_eq!(response.headers().len(), 2);
    }

    #[test]
    fn untouched_context_keeps_response() {
        let ctx = ResponseContext::default();
        let mut response = "ok".into_response();
        ctx.apply(&mut response);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn enabled_only_for_http_services() {
        let mut defs = Definitions::default();
        defs.types = vec!["worker".into()];
        let feature = HttpFeature::new();
        let can = |defs: &Definitions| {
            feature.can_be_initialized(&CanBeInitializedOptions {
                deployment_env: keel_core::ServiceDeploy::Local,
                definitions: defs,
            })
        };
        assert!(!can(&defs));

        defs.types.push("http:8081".into());
        assert!(can(&defs));
    }

    #[test]
    fn settings_block_is_validated() {
        let mut defs: Definitions = r#"
            [features.keel-http.headers]
            "x-frame-options" = "DENY"
        "#
        .parse()
        .unwrap();

        let entry = HttpFeature::new().definitions(&defs).unwrap();
        entry.validate().unwrap();

        defs.features = toml::from_str(
            r#"
            [keel-http.headers]
            "bad header" = "x"
            "#,
        )
        .unwrap();
        let entry = HttpFeature::new().definitions(&defs).unwrap();
        assert!(entry.validate().is_err());
    }
}
