//! The `http` transport.
//!
//! Serves the axum [`Router`] the service object publishes through
//! [`HttpApi`]. The listener is bound during initialization so that port
//! conflicts fail bootstrap rather than the run phase.
//!
//! Requests pass, from the outside in: request id, trace and timeout
//! layers, request tracking, panic recovery, CORS, authentication, the
//! tracer, and finally the default headers and response context.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use http::header::{HeaderName, HeaderValue};
use http::{Extensions, HeaderMap, StatusCode};
use keel_core::definition::ExternalServiceEntry;
use keel_core::{Attribute, Definitions, LoggerApi, ServiceDeploy, ServiceKind};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::behavior::{CorsHandler, HttpAuthenticator, Recovery, Tracer, Tracker, UuidTracker};
use crate::features::http::{HttpFeature, ResponseContext};
use crate::handler::{self, ServiceHandler};
use crate::plugin::feature::{
    HTTP_AUTH_FEATURE_NAME, HTTP_CORS_FEATURE_NAME, HTTP_FEATURE_NAME, PANIC_RECOVERY_FEATURE_NAME,
    TRACING_FEATURE_NAME, TRACKER_FEATURE_NAME,
};
use crate::plugin::{Feature, Service, ServiceOptions, ServiceSettings};
use crate::request_context;

/// Role of a service answering HTTP requests.
pub trait HttpApi: Send + Sync {
    fn routes(&self) -> Router;
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// `[services.http]` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpServiceDefinitions {
    /// Prefix every route is nested under.
    pub base_path: Option<String>,
    pub request_timeout_secs: u64,
    /// Skips the CORS policy even when a CORS feature is enabled.
    pub disable_cors: bool,
    /// Invalid CORS options fail initialization. Otherwise they are logged
    /// and CORS is left off.
    pub cors_strict: bool,
    /// Serves every route unauthenticated even when an authenticator is
    /// enabled.
    pub disable_auth: bool,
    /// Lets handler panics reach the server instead of answering 500.
    pub disable_panic_recovery: bool,
}

impl Default for HttpServiceDefinitions {
    fn default() -> Self {
        Self {
            base_path: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            disable_cors: false,
            cors_strict: true,
            disable_auth: false,
            disable_panic_recovery: false,
        }
    }
}

impl ExternalServiceEntry for HttpServiceDefinitions {
    fn name(&self) -> &str {
        ServiceKind::HTTP.as_str()
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.base_path {
            anyhow::ensure!(path.starts_with('/'), "base_path '{path}' must start with '/'");
        }
        anyhow::ensure!(self.request_timeout_secs > 0, "request_timeout_secs must be positive");
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// ---------------------------------------------------------------------------
// HttpService
// ---------------------------------------------------------------------------

struct Prepared {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    settings: HttpServiceDefinitions,
    service_name: String,
    logger: Arc<dyn LoggerApi>,
    request_id_header: HeaderName,
    tracker: Arc<dyn Tracker>,
    tracer: Option<Arc<dyn Tracer>>,
    authenticator: Option<Arc<dyn HttpAuthenticator>>,
    recovery: Option<Arc<dyn Recovery>>,
    cors: Option<CorsLayer>,
    default_headers: HeaderMap,
}

#[derive(Default)]
pub struct HttpService {
    prepared: Mutex<Option<Prepared>>,
    shutdown: Mutex<CancellationToken>,
}

impl HttpService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the listener is bound to, once initialized.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.prepared.lock().as_ref().map(|p| p.local_addr)
    }
}

#[derive(Clone)]
struct TrackerIds(Arc<dyn Tracker>);

impl MakeRequestId for TrackerIds {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&self.0.generate()).ok().map(RequestId::new)
    }
}

async fn attach_response_context(mut request: Request, next: Next) -> Response {
    let ctx = ResponseContext::default();
    request.extensions_mut().insert(ctx.clone());
    let mut response = next.run(request).await;
    ctx.apply(&mut response);
    response
}

/// Stores the request id through the tracker and serves the rest of the
/// request inside its context.
async fn track_request(State(tracker): State<Arc<dyn Tracker>>, mut request: Request, next: Next) -> Response {
    let id = request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .map(str::to_string);

    let mut ctx = Extensions::new();
    if let Some(id) = id {
        tracker.add(&mut ctx, id.clone());
        tracker.add(request.extensions_mut(), id);
    }
    request_context::scope(ctx, next.run(request)).await
}

async fn authenticate(
    State(authenticator): State<Arc<dyn HttpAuthenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Err(response) = authenticator.authenticate(&mut request).await {
        return response;
    }
    next.run(request).await
}

#[derive(Clone)]
struct Measure {
    tracer: Arc<dyn Tracer>,
    service: String,
    logger: Arc<dyn LoggerApi>,
}

async fn measure(State(m): State<Measure>, request: Request, next: Next) -> Response {
    let ctx = request_context::current();
    let data = m
        .tracer
        .start_measurements(&ctx, &m.service)
        .inspect_err(|e| {
            m.logger
                .error("tracing begin failed", &[Attribute::string("error", format!("{e:#}"))]);
        })
        .ok();

    let response = next.run(request).await;

    if let Some(data) = data {
        if let Err(e) = m.tracer.compute_metrics(&ctx, &m.service, data) {
            m.logger
                .error("tracing cease failed", &[Attribute::string("error", format!("{e:#}"))]);
        }
    }
    response
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| (*s).to_string()))
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Answers a panicking handler with 500 after telling the recovery hook.
fn recover_panics(
    recovery: Option<Arc<dyn Recovery>>,
    logger: Arc<dyn LoggerApi>,
) -> impl Fn(Box<dyn Any + Send + 'static>) -> Response + Clone + Send + Sync + 'static {
    move |payload: Box<dyn Any + Send + 'static>| {
        let message = panic_message(payload.as_ref());
        logger.error("request handler panicked", &[Attribute::string("panic", message.clone())]);
        if let Some(recovery) = &recovery {
            recovery.recover(&request_context::current(), &message);
        }
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

/// The CORS layer of `handler`. Invalid options fail in strict mode and
/// turn CORS off otherwise.
fn cors_layer(handler: &dyn CorsHandler, strict: bool, logger: &dyn LoggerApi) -> anyhow::Result<Option<CorsLayer>> {
    match handler.cors().layer() {
        Ok(layer) => Ok(Some(layer)),
        Err(e) if strict => Err(e.into()),
        Err(e) => {
            logger.warn(
                "invalid CORS options, CORS disabled",
                &[Attribute::string("error", e.to_string())],
            );
            Ok(None)
        }
    }
}

fn build_router(routes: Router, prepared: &Prepared) -> Router {
    let mut router = match prepared.settings.base_path.as_deref() {
        Some(path) if path != "/" => Router::new().nest(path, routes),
        _ => routes,
    };

    router = router.layer(middleware::from_fn(attach_response_context));

    if !prepared.default_headers.is_empty() {
        let headers = prepared.default_headers.clone();
        router = router.layer(middleware::map_response(move |mut response: Response| {
            let headers = headers.clone();
            async move {
                for (name, value) in &headers {
                    response.headers_mut().entry(name).or_insert_with(|| value.clone());
                }
                response
            }
        }));
    }

    if let Some(tracer) = &prepared.tracer {
        let state = Measure {
            tracer: Arc::clone(tracer),
            service: prepared.service_name.clone(),
            logger: Arc::clone(&prepared.logger),
        };
        router = router.layer(middleware::from_fn_with_state(state, measure));
    }

    if let Some(authenticator) = &prepared.authenticator {
        router = router.layer(middleware::from_fn_with_state(Arc::clone(authenticator), authenticate));
    }

    if let Some(cors) = prepared.cors.clone() {
        router = router.layer(cors);
    }

    if !prepared.settings.disable_panic_recovery {
        router = router.layer(CatchPanicLayer::custom(recover_panics(
            prepared.recovery.clone(),
            Arc::clone(&prepared.logger),
        )));
    }

    router = router.layer(middleware::from_fn_with_state(
        Arc::clone(&prepared.tracker),
        track_request,
    ));

    let header = prepared.request_id_header.clone();
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(
                header.clone(),
                TrackerIds(Arc::clone(&prepared.tracker)),
            ))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(prepared.settings.request_timeout_secs),
            ))
            .layer(PropagateRequestIdLayer::new(header)),
    )
}

fn default_headers(options: &ServiceOptions) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Some(feature) = options.features.get_as::<HttpFeature>(HTTP_FEATURE_NAME) else {
        return headers;
    };
    if !feature.entry().is_enabled() {
        return headers;
    }
    for (key, value) in feature.default_headers() {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(key), HeaderValue::try_from(value)) {
            headers.append(name, value);
        }
    }
    headers
}

#[async_trait]
impl Service for HttpService {
    fn name(&self) -> &str {
        ServiceKind::HTTP.as_str()
    }

    fn info(&self) -> Vec<Attribute> {
        let mut info = vec![Attribute::string("service.mode", ServiceKind::HTTP.as_str())];
        if let Some(prepared) = self.prepared.lock().as_ref() {
            info.push(Attribute::uint("service.port", u64::from(prepared.local_addr.port())));
            if let Some(path) = &prepared.settings.base_path {
                info.push(Attribute::string("service.base_path", path.clone()));
            }
            info.push(Attribute::bool("service.http_auth", prepared.authenticator.is_some()));
        }
        info
    }

    async fn initialize(&self, options: ServiceOptions) -> anyhow::Result<()> {
        options.roles.require::<dyn HttpApi>()?;

        let settings = options
            .definitions
            .external_service_definitions(ServiceKind::HTTP.as_str())
            .ok()
            .and_then(|entry| entry.as_any().downcast_ref::<HttpServiceDefinitions>().cloned())
            .unwrap_or_default();

        let request_id_header = HeaderName::try_from(options.env.tracker_header_name())?;
        let tracker = options
            .features
            .framework_api::<dyn Tracker>(TRACKER_FEATURE_NAME)
            .unwrap_or_else(|| Arc::new(UuidTracker));
        let cors = match options.features.framework_api::<dyn CorsHandler>(HTTP_CORS_FEATURE_NAME) {
            Some(handler) if !settings.disable_cors => {
                cors_layer(handler.as_ref(), settings.cors_strict, options.logger.as_ref())?
            }
            _ => None,
        };

        let tracer = options.features.framework_api::<dyn Tracer>(TRACING_FEATURE_NAME);
        let recovery = options.features.framework_api::<dyn Recovery>(PANIC_RECOVERY_FEATURE_NAME);

        let test_mode = options.service_context.deployment == ServiceDeploy::Test;
        let authenticator = if settings.disable_auth || test_mode {
            None
        } else {
            options
                .features
                .framework_api::<dyn HttpAuthenticator>(HTTP_AUTH_FEATURE_NAME)
        };
        if authenticator.is_some() {
            options.logger.info("using authenticated HTTP endpoints", &[]);
        }

        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], options.port))).await?;
        let local_addr = listener.local_addr()?;

        *self.prepared.lock() = Some(Prepared {
            listener: Some(listener),
            local_addr,
            settings,
            service_name: options.service_name.clone(),
            logger: Arc::clone(&options.logger),
            request_id_header,
            tracker,
            tracer,
            authenticator,
            recovery,
            cors,
            default_headers: default_headers(&options),
        });
        *self.shutdown.lock() = CancellationToken::new();
        Ok(())
    }

    async fn run(&self, handler: Arc<dyn ServiceHandler>) -> anyhow::Result<()> {
        let api = handler::roles(&handler)
            .get::<dyn HttpApi>()
            .ok_or_else(|| anyhow::anyhow!("service object does not implement HttpApi"))?;

        let (listener, router) = {
            let mut guard = self.prepared.lock();
            let prepared = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("http service was not initialized"))?;
            let listener = prepared
                .listener
                .take()
                .ok_or_else(|| anyhow::anyhow!("http service is already running"))?;
            (listener, build_router(api.routes(), prepared))
        };

        let shutdown = self.shutdown.lock().clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.lock().cancel();
        Ok(())
    }

    fn settings(&self) -> Option<&dyn ServiceSettings> {
        Some(self)
    }
}

impl ServiceSettings for HttpService {
    fn definitions(&self, definitions: &Definitions) -> anyhow::Result<Arc<dyn ExternalServiceEntry>> {
        let settings: HttpServiceDefinitions = match definitions.service_block(&ServiceKind::HTTP) {
            Some(block) => toml::Value::Table(block.clone()).try_into()?,
            None => HttpServiceDefinitions::default(),
        };
        Ok(Arc::new(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::CorsOptions;
    use crate::logger::Logger;

    #[test]
    fn settings_are_read_from_services_block() {
        let defs: Definitions = r#"
            [services.http]
            base_path = "/orders"
            request_timeout_secs = 5
        "#
        .parse()
        .unwrap();

        let entry = HttpService::new().definitions(&defs).unwrap();
        entry.validate().unwrap();
        let settings = entry.as_any().downcast_ref::<HttpServiceDefinitions>().unwrap();
        assert_eq!(settings.base_path.as_deref(), Some("/orders"));
        assert_eq!(settings.request_timeout_secs, 5);
    }

    #[test]
    fn missing_block_uses_defaults() {
        let entry = HttpService::new().definitions(&Definitions::default()).unwrap();
        let settings = entry.as_any().downcast_ref::<HttpServiceDefinitions>().unwrap();
        assert_eq!(settings.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert!(!settings.disable_cors);
        assert!(settings.cors_strict);
        assert!(!settings.disable_auth);
        assert!(!settings.disable_panic_recovery);
    }

    struct WildcardCredentials;

    impl CorsHandler for WildcardCredentials {
        fn cors(&self) -> CorsOptions {
            CorsOptions {
                allowed_origins: vec!["*".into()],
                allow_credentials: true,
                ..CorsOptions::default()
            }
        }
    }

    #[test]
    fn invalid_cors_fails_only_in_strict_mode() {
        let logger = Logger::discard();

        let err = cors_layer(&WildcardCredentials, true, &logger).unwrap_err();
        assert!(err.to_string().contains("wildcard origin"), "{err}");

        assert!(cors_layer(&WildcardCredentials, false, &logger).unwrap().is_none());
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(&"stock exploded"), "stock exploded");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }

    #[test]
    fn relative_base_path_is_rejected() {
        let settings = HttpServiceDefinitions {
            base_path: Some("orders".into()),
            ..HttpServiceDefinitions::default()
        };
        assert!(settings.validate().is_err());
    }

    #[tokio::test]
    async fn run_requires_initialization() {
        struct Routes;
        impl HttpApi for Routes {
            fn routes(&self) -> Router {
                Router::new()
            }
        }
        impl ServiceHandler for Routes {
            fn expose(self: Arc<Self>, roles: &mut crate::api::ApiSet) {
                roles.insert::<dyn HttpApi>(self);
            }
        }

        let err = HttpService::new().run(Arc::new(Routes)).await.unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }
}
