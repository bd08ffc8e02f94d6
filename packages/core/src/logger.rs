//! Structured logger contract.
//!
//! The framework and every feature log through [`LoggerApi`]. The concrete
//! implementation lives in the runtime crate and writes through `tracing`.

use std::fmt;
use std::str::FromStr;

use crate::attribute::Attribute;

/// Severity levels, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    /// Framework-internal diagnostics, between debug and info.
    Internal,
    Info,
    Warn,
    Error,
    /// Logged once right before a process-terminating abort.
    Fatal,
}

impl Level {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Internal => "internal",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a level name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported log level '{0}'")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    /// Only the levels a service may select in its definitions are accepted;
    /// `fatal` is reserved for aborts.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "internal" => Ok(Self::Internal),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Leveled logging with key/value attributes and a runtime-adjustable
/// threshold.
pub trait LoggerApi: Send + Sync {
    /// Emits `msg` at `level` if the current threshold allows it.
    fn log(&self, level: Level, msg: &str, attrs: &[Attribute]);

    /// Changes the threshold, returning the previous level.
    ///
    /// # Errors
    ///
    /// Returns [`ParseLevelError`] if `level` is not a known level name.
    fn set_level(&self, level: &str) -> Result<Level, ParseLevelError>;

    /// Current threshold.
    fn level(&self) -> Level;

    fn debug(&self, msg: &str, attrs: &[Attribute]) {
        self.log(Level::Debug, msg, attrs);
    }

    fn internal(&self, msg: &str, attrs: &[Attribute]) {
        self.log(Level::Internal, msg, attrs);
    }

    fn info(&self, msg: &str, attrs: &[Attribute]) {
        self.log(Level::Info, msg, attrs);
    }

    fn warn(&self, msg: &str, attrs: &[Attribute]) {
        self.log(Level::Warn, msg, attrs);
    }

    fn error(&self, msg: &str, attrs: &[Attribute]) {
        self.log(Level::Error, msg, attrs);
    }

    /// Logs an abort. Terminating the process is left to the caller so that
    /// shutdown can still run.
    fn fatal(&self, msg: &str, attrs: &[Attribute]) {
        self.log(Level::Fatal, msg, attrs);
    }
}
