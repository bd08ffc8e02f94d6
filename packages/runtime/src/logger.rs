//! `tracing`-backed service logger.
//!
//! Every line carries the service identity attributes plus the
//! `[log.attributes]` of the definitions. The threshold can be changed at
//! runtime. In test deployments messages are discarded unless the
//! definitions ask to keep them.
//!
//! Lines are emitted under the [`LOG_TARGET`] target with their attributes
//! as one JSON object; [`JsonLines`] lifts them to top-level keys.

use std::backtrace::Backtrace;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use keel_core::definition::DefinitionError;
use keel_core::logger::ParseLevelError;
use keel_core::{to_json_object, Attribute, Definitions, Level, LoggerApi, ServiceDeploy};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::behavior::LoggerExtractor;
use crate::context::ServiceContext;
use crate::request_context;

/// Target of every line written through [`Logger`].
pub const LOG_TARGET: &str = "keel::log";

/// Service lines pass at any level; [`Logger`] applies its own threshold.
const DEFAULT_DIRECTIVES: &str = "info,keel::log=trace";

const ATTRIBUTES_FIELD: &str = "attributes";

// ---------------------------------------------------------------------------
// StackTraceMode
// ---------------------------------------------------------------------------

/// How error-level lines carry a backtrace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StackTraceMode {
    /// The backtrace as one `stack` string attribute.
    #[default]
    Default,
    Disabled,
    /// The backtrace as a `stack` JSON array, one entry per line.
    Structured,
}

impl FromStr for StackTraceMode {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "disabled" => Ok(Self::Disabled),
            "structured" => Ok(Self::Structured),
            other => Err(DefinitionError::InvalidLogOption {
                field: "error_stack_trace",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct LoggerOptions {
    pub level: Option<Level>,
    /// Attributes added to every line.
    pub fixed: Vec<Attribute>,
    pub discard: bool,
    pub stack_trace: StackTraceMode,
}

pub struct Logger {
    level: ArcSwap<Level>,
    fixed: Vec<Attribute>,
    discard: bool,
    stack_trace: StackTraceMode,
    extractor: RwLock<Option<Arc<dyn LoggerExtractor>>>,
}

impl Logger {
    #[must_use]
    pub fn new(options: LoggerOptions) -> Self {
        Self {
            level: ArcSwap::from_pointee(options.level.unwrap_or(Level::Info)),
            fixed: options.fixed,
            discard: options.discard,
            stack_trace: options.stack_trace,
            extractor: RwLock::new(None),
        }
    }

    /// A logger that drops every message.
    #[must_use]
    pub fn discard() -> Self {
        Self::new(LoggerOptions {
            discard: true,
            ..LoggerOptions::default()
        })
    }

    /// Builds the service logger from its definitions.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidLogOption`] if the `[log]` block
    /// names an unknown level or stack trace mode.
    pub fn from_definitions(defs: &Definitions, ctx: &ServiceContext) -> Result<Self, DefinitionError> {
        let level = defs
            .log
            .level
            .as_deref()
            .map(|level| {
                level.parse::<Level>().map_err(|_| DefinitionError::InvalidLogOption {
                    field: "level",
                    value: level.to_string(),
                })
            })
            .transpose()?;

        let stack_trace = defs
            .log
            .error_stack_trace
            .as_deref()
            .map(str::parse)
            .transpose()?
            .unwrap_or_default();

        let mut fixed = vec![
            Attribute::string("service.name", ctx.name.clone()),
            Attribute::string("service.type", ctx.service_type()),
            Attribute::string("service.version", ctx.version.clone()),
            Attribute::string("service.env", ctx.deployment.as_str()),
        ];
        if !ctx.product.is_empty() {
            fixed.push(Attribute::string("service.product", ctx.product.clone()));
        }
        fixed.extend(
            defs.log
                .attributes
                .iter()
                .map(|(key, value)| Attribute::string(key.clone(), value.clone())),
        );

        Ok(Self::new(LoggerOptions {
            level,
            fixed,
            discard: ctx.deployment == ServiceDeploy::Test && defs.discard_test_log_messages(),
            stack_trace,
        }))
    }

    /// Adds the extractor's attributes to every following line.
    pub fn set_extractor(&self, extractor: Arc<dyn LoggerExtractor>) {
        *self.extractor.write() = Some(extractor);
    }

    #[must_use]
    pub fn fixed_attributes(&self) -> &[Attribute] {
        &self.fixed
    }

    fn enabled(&self, level: Level) -> bool {
        !self.discard && level >= **self.level.load()
    }

    fn line_attributes(&self, level: Level, attrs: &[Attribute]) -> Vec<Attribute> {
        let mut line = self.fixed.clone();
        if let Some(extractor) = self.extractor.read().as_ref() {
            line.extend(extractor.extract(&request_context::current()));
        }
        line.extend_from_slice(attrs);

        if level >= Level::Error {
            match self.stack_trace {
                StackTraceMode::Disabled => {}
                StackTraceMode::Default => {
                    line.push(Attribute::string("stack", Backtrace::force_capture().to_string()));
                }
                StackTraceMode::Structured => {
                    let trace = Backtrace::force_capture().to_string();
                    let frames: Vec<&str> = trace.lines().map(str::trim).collect();
                    line.push(Attribute::json("stack", &frames));
                }
            }
        }

        line
    }
}

impl LoggerApi for Logger {
    fn log(&self, level: Level, msg: &str, attrs: &[Attribute]) {
        if !self.enabled(level) {
            return;
        }

        let line = self.line_attributes(level, attrs);
        let attrs = Value::Object(to_json_object(&line));
        match level {
            Level::Debug => tracing::debug!(target: LOG_TARGET, attributes = %attrs, "{msg}"),
            Level::Internal => tracing::debug!(target: LOG_TARGET, internal = true, attributes = %attrs, "{msg}"),
            Level::Info => tracing::info!(target: LOG_TARGET, attributes = %attrs, "{msg}"),
            Level::Warn => tracing::warn!(target: LOG_TARGET, attributes = %attrs, "{msg}"),
            Level::Error => tracing::error!(target: LOG_TARGET, attributes = %attrs, "{msg}"),
            Level::Fatal => tracing::error!(target: LOG_TARGET, fatal = true, attributes = %attrs, "{msg}"),
        }
    }

    fn set_level(&self, level: &str) -> Result<Level, ParseLevelError> {
        let level: Level = level.parse()?;
        let previous = self.level.swap(Arc::new(level));
        Ok(*previous)
    }

    fn level(&self) -> Level {
        **self.level.load()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field("discard", &self.discard)
            .field("stack_trace", &self.stack_trace)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// `info` for everything except service lines, which [`Logger`] already
/// filtered by its own level.
#[must_use]
pub fn default_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_DIRECTIVES)
}

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides
/// [`default_filter`]. A subscriber installed earlier is left in place.
pub fn init_subscriber(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let _ = if json {
        builder.event_format(JsonLines).try_init()
    } else {
        builder.with_target(false).try_init()
    };
}

/// One JSON object per event: `timestamp` (unix millis), `level`, `target`,
/// `message` and every attribute as its own key.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLines;

impl<S, N> FormatEvent<S, N> for JsonLines
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let meta = event.metadata();
        let mut fields = JsonFields::default();
        event.record(&mut fields);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();

        let mut line = fields.0;
        line.insert("timestamp".into(), timestamp.into());
        line.insert("level".into(), meta.level().to_string().to_ascii_lowercase().into());
        line.insert("target".into(), meta.target().into());

        let encoded = serde_json::to_string(&Value::Object(line)).map_err(|_| fmt::Error)?;
        writeln!(writer, "{encoded}")
    }
}

#[derive(Default)]
struct JsonFields(Map<String, Value>);

impl Visit for JsonFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == ATTRIBUTES_FIELD {
            if let Ok(Value::Object(attrs)) = serde_json::from_str(value) {
                self.0.extend(attrs);
                return;
            }
        }
        self.0.insert(field.name().into(), value.into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_str(field, &format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().into(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().into(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().into(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use http::Extensions;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;
    use crate::behavior::TrackId;

    struct RequestId;

    impl LoggerExtractor for RequestId {
        fn extract(&self, ctx: &Extensions) -> Vec<Attribute> {
            let id = ctx.get::<TrackId>().map_or("none", |id| id.0.as_str());
            vec![Attribute::string("request.id", id)]
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Captured {
        fn lines(&self) -> Vec<Value> {
            String::from_utf8_lossy(&self.0.lock())
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<Value> {
        let out = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(default_filter())
            .event_format(JsonLines)
            .with_writer(out.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        out.lines()
    }

    fn definitions() -> Definitions {
        let mut defs = Definitions::default();
        defs.name = "orders".into();
        defs.version = "v1".into();
        defs.types = vec!["worker".into()];
        defs.log.attributes.insert("team".into(), "payments".into());
        defs
    }

    #[test]
    fn fixed_attributes_identify_the_service() {
        let defs = definitions();
        let ctx = ServiceContext::new(&defs, ServiceDeploy::Local);
        let logger = Logger::from_definitions(&defs, &ctx).unwrap();

        let keys: Vec<_> = logger.fixed_attributes().iter().map(|a| a.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["service.name", "service.type", "service.version", "service.env", "team"]
        );
        assert_eq!(logger.level(), Level::Info);
    }

    #[test]
    fn level_can_change_at_runtime() {
        let logger = Logger::new(LoggerOptions::default());
        assert!(!logger.enabled(Level::Debug));

        assert_eq!(logger.set_level("debug").unwrap(), Level::Info);
        assert!(logger.enabled(Level::Debug));
        assert!(logger.set_level("loud").is_err());
    }

    #[test]
    fn test_deployments_discard_by_default() {
        let mut defs = definitions();
        let ctx = ServiceContext::new(&defs, ServiceDeploy::Test);
        assert!(!Logger::from_definitions(&defs, &ctx).unwrap().enabled(Level::Fatal));

        defs.tests.discard_log_messages = Some(false);
        assert!(Logger::from_definitions(&defs, &ctx).unwrap().enabled(Level::Info));
    }

    #[test]
    fn invalid_options_are_rejected() {
        let mut defs = definitions();
        let ctx = ServiceContext::new(&defs, ServiceDeploy::Local);
        defs.log.error_stack_trace = Some("verbose".into());
        assert!(matches!(
            Logger::from_definitions(&defs, &ctx),
            Err(DefinitionError::InvalidLogOption { field: "error_stack_trace", .. })
        ));
    }

    #[test]
    fn extractor_and_stack_trace_attributes() {
        let logger = Logger::new(LoggerOptions {
            stack_trace: StackTraceMode::Structured,
            ..LoggerOptions::default()
        });
        logger.set_extractor(Arc::new(RequestId));

        let info = logger.line_attributes(Level::Info, &[]);
        assert_eq!(info, vec![Attribute::string("request.id", "none")]);

        let error = logger.line_attributes(Level::Error, &[]);
        assert_eq!(error.last().map(|a| a.key.as_str()), Some("stack"));
    }

    #[tokio::test]
    async fn extractor_reads_the_request_context() {
        let logger = Logger::new(LoggerOptions::default());
        logger.set_extractor(Arc::new(RequestId));

        let mut ctx = Extensions::new();
        ctx.insert(TrackId("req-9".into()));
        let line = request_context::scope(ctx, async { logger.line_attributes(Level::Info, &[]) }).await;

        assert_eq!(line, vec![Attribute::string("request.id", "req-9")]);
    }

    #[test]
    fn debug_lines_appear_once_the_level_allows_them() {
        let logger = Logger::new(LoggerOptions::default());

        let lines = capture(|| {
            logger.debug("hidden", &[]);
            logger.set_level("debug").unwrap();
            logger.debug("cache warmed", &[]);
        });

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["message"], "cache warmed");
        assert_eq!(lines[0]["level"], "debug");
        assert_eq!(lines[0]["target"], LOG_TARGET);
    }

    #[test]
    fn attributes_are_top_level_json_keys() {
        let logger = Logger::new(LoggerOptions {
            fixed: vec![Attribute::string("service.name", "orders")],
            stack_trace: StackTraceMode::Disabled,
            ..LoggerOptions::default()
        });

        let lines = capture(|| {
            logger.warn(
                "stock low",
                &[Attribute::int("stock.left", 3), Attribute::bool("stock.reorder", true)],
            );
        });

        let line = &lines[0];
        assert_eq!(line["service.name"], "orders");
        assert_eq!(line["stock.left"], 3);
        assert_eq!(line["stock.reorder"], true);
        assert_eq!(line["level"], "warn");
        assert!(line.get(ATTRIBUTES_FIELD).is_none());
    }
}
