//! Logging infrastructure for the portkeep library.
//!
//! This module provides a simple stderr-based logging system with
//! configurable log levels. The engine emits at five levels —
//! *trace/debug/info/warn/error* — rather than a coarser quiet/normal/verbose
//! split, since callers (the CLI in particular) want to distinguish routine
//! tracing from an actionable warning.
#![forbid(unsafe_code)]

use std::env;
use std::fmt;

/// Logging level for controlling output verbosity, ordered from least to
/// most verbose.
///
/// # Examples
///
/// ```
/// use portkeep::LogLevel;
///
/// assert!(LogLevel::Error < LogLevel::Warn);
/// assert!(LogLevel::Warn < LogLevel::Info);
/// assert!(LogLevel::Info < LogLevel::Debug);
/// assert!(LogLevel::Debug < LogLevel::Trace);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Suppress all output.
    Off,
    /// Persistent failures that raise to the caller.
    Error,
    /// Inability to determine ranges, sudo elevation failures, release-check collisions.
    Warn,
    /// Reserved/released port notices, engine instantiation, lock file in use.
    Info,
    /// Vet progression, bit-scan start points.
    Debug,
    /// Everything, including per-syscall detail.
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

impl LogLevel {
    /// Parses a log level from a string.
    ///
    /// Recognizes: "off", "error", "warn", "info", "debug", "trace"
    /// (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not recognized.
    ///
    /// # Examples
    ///
    /// ```
    /// use portkeep::LogLevel;
    ///
    /// assert_eq!(LogLevel::parse("debug").unwrap(), LogLevel::Debug);
    /// assert_eq!(LogLevel::parse("TRACE").unwrap(), LogLevel::Trace);
    /// assert!(LogLevel::parse("invalid").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!("invalid log level: {s}")),
        }
    }
}

/// A simple stderr-based logger.
///
/// The logger respects the configured log level and only outputs messages
/// at or above that level.
///
/// # Examples
///
/// ```
/// use portkeep::{Logger, LogLevel};
///
/// let logger = Logger::new(LogLevel::Info);
/// logger.error("this is an error message");
/// logger.debug("this will not be printed (requires Debug or Trace)");
/// ```
pub struct Logger {
    level: LogLevel,
}

impl Logger {
    /// Creates a new logger with the specified log level.
    #[must_use]
    pub const fn new(level: LogLevel) -> Self {
        Self { level }
    }

    /// Returns the current log level.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }

    /// Logs an error message. Shown unless the level is `Off`.
    pub fn error(&self, message: &str) {
        if self.level >= LogLevel::Error {
            eprintln!("ERROR: {message}");
        }
    }

    /// Logs a warning message.
    pub fn warn(&self, message: &str) {
        if self.level >= LogLevel::Warn {
            eprintln!("WARN: {message}");
        }
    }

    /// Logs an informational message.
    pub fn info(&self, message: &str) {
        if self.level >= LogLevel::Info {
            eprintln!("INFO: {message}");
        }
    }

    /// Logs a debug message.
    pub fn debug(&self, message: &str) {
        if self.level >= LogLevel::Debug {
            eprintln!("DEBUG: {message}");
        }
    }

    /// Logs a trace message.
    pub fn trace(&self, message: &str) {
        if self.level >= LogLevel::Trace {
            eprintln!("TRACE: {message}");
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

/// Initializes a logger based on environment variables and an explicit override.
///
/// The priority order is:
/// 1. `explicit`, if given
/// 2. `PORTKEEP_LOG_MODE` environment variable
/// 3. Default (`Info`)
///
/// # Examples
///
/// ```
/// use portkeep::init_logger;
///
/// let logger = init_logger(None);
/// ```
#[must_use]
pub fn init_logger(explicit: Option<LogLevel>) -> Logger {
    if let Some(level) = explicit {
        return Logger::new(level);
    }

    if let Ok(env_value) = env::var("PORTKEEP_LOG_MODE") {
        if let Ok(level) = LogLevel::parse(&env_value) {
            return Logger::new(level);
        }
    }

    Logger::new(LogLevel::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Off < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(format!("{}", LogLevel::Off), "off");
        assert_eq!(format!("{}", LogLevel::Trace), "trace");
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::parse("WARN").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::parse("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::parse("Info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::parse("debug").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::parse("TRACE").unwrap(), LogLevel::Trace);
        assert!(LogLevel::parse("invalid").is_err());
        assert!(LogLevel::parse("").is_err());
    }

    #[test]
    fn test_logger_creation() {
        let logger = Logger::new(LogLevel::Trace);
        assert_eq!(logger.level(), LogLevel::Trace);
    }

    #[test]
    fn test_logger_default() {
        let logger = Logger::default();
        assert_eq!(logger.level(), LogLevel::Info);
    }

    #[test]
    #[serial_test::serial(portkeep_log_mode_env)]
    fn test_init_logger_defaults() {
        let saved_env = env::var("PORTKEEP_LOG_MODE").ok();
        env::remove_var("PORTKEEP_LOG_MODE");

        let logger = init_logger(None);
        assert_eq!(logger.level(), LogLevel::Info);

        if let Some(val) = saved_env {
            env::set_var("PORTKEEP_LOG_MODE", val);
        }
    }

    #[test]
    fn test_init_logger_explicit_override() {
        let logger = init_logger(Some(LogLevel::Trace));
        assert_eq!(logger.level(), LogLevel::Trace);
    }

    #[test]
    #[serial_test::serial(portkeep_log_mode_env)]
    fn test_init_logger_from_env() {
        let saved_env = env::var("PORTKEEP_LOG_MODE").ok();

        env::set_var("PORTKEEP_LOG_MODE", "debug");
        let logger = init_logger(None);
        assert_eq!(logger.level(), LogLevel::Debug);

        env::set_var("PORTKEEP_LOG_MODE", "off");
        let logger = init_logger(None);
        assert_eq!(logger.level(), LogLevel::Off);

        match saved_env {
            Some(val) => env::set_var("PORTKEEP_LOG_MODE", val),
            None => env::remove_var("PORTKEEP_LOG_MODE"),
        }
    }

    #[test]
    #[serial_test::serial(portkeep_log_mode_env)]
    fn test_init_logger_env_invalid_fallback() {
        let saved_env = env::var("PORTKEEP_LOG_MODE").ok();

        env::set_var("PORTKEEP_LOG_MODE", "invalid");
        let logger = init_logger(None);
        assert_eq!(logger.level(), LogLevel::Info);

        match saved_env {
            Some(val) => env::set_var("PORTKEEP_LOG_MODE", val),
            None => env::remove_var("PORTKEEP_LOG_MODE"),
        }
    }

    #[test]
    #[serial_test::serial(portkeep_log_mode_env)]
    fn test_init_logger_explicit_overrides_env() {
        let saved_env = env::var("PORTKEEP_LOG_MODE").ok();

        env::set_var("PORTKEEP_LOG_MODE", "info");
        let logger = init_logger(Some(LogLevel::Trace));
        assert_eq!(logger.level(), LogLevel::Trace);

        match saved_env {
            Some(val) => env::set_var("PORTKEEP_LOG_MODE", val),
            None => env::remove_var("PORTKEEP_LOG_MODE"),
        }
    }
}
