//! # Logging Utilities
//!
//! Logging infrastructure for kdctl using `tracing`.
//!
//! This module provides structured logging with support for:
//! - Pretty (development) and JSON (machine-readable) output
//! - Environment variable configuration
//! - Log level filtering
//! - An optional daily-rolling log file
//!
//! Console output goes to stderr so it never mixes with command output.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kdctl_utils::init_logging;
//!
//! // Initialize with default settings (reads from RUST_LOG env var)
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("Attached");
//! ```
//!
//! Keep the returned guard alive until exit: it flushes the file writer on drop.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Log level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=kdctl_core=trace`)
//! - `KDCTL_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `KDCTL_LOG_FILE`: Optional path to a log file, rolled daily
//!
//! Engine output (register dumps, stack dumps) is logged under the
//! `kdctl::engine` target, so `RUST_LOG=kdctl::engine=off` silences it.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'pretty' or 'json'")),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Unknown log level: {s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            )),
        }
    }
}

/// Keeps the background file writer alive. Dropping it flushes pending lines.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// Initialize logging with default settings
///
/// Reads configuration from environment variables:
/// - `RUST_LOG`: Log level filter (e.g., `debug`, `kdctl_core=debug`)
/// - `KDCTL_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
/// - `KDCTL_LOG_FILE`: Optional path to log file
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `KDCTL_LOG_FORMAT` holds an unknown format
/// - The log file directory cannot be created
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var("KDCTL_LOG_FORMAT") {
        Ok(value) => LogFormat::from_str(&value).map_err(LoggingError::InvalidFormat)?,
        Err(_) => LogFormat::default(),
    };

    let default_level = env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<LogLevel>().ok())
        .unwrap_or_default();

    init_logging_internal(format, default_level.into(), None)
}

/// Initialize logging with explicit level and format
///
/// The level replaces `RUST_LOG`; `KDCTL_LOG_FILE` is still honoured.
///
/// ```rust,no_run
/// use kdctl_utils::{LogFormat, LogLevel, init_logging_with_level};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty)
///     .expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if logging is already initialized or file logging fails.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_logging_internal(format, level.into(), Some(level.into()))
}

/// Initialize file-only logging (nothing on the console)
///
/// Used for quiet runs. Without an explicit path the file is
/// `~/.kdctl/YYYY-MM-DD-kdctl.log`, falling back to the system temporary
/// directory when there is no home directory.
///
/// Returns the guard and the path written to.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the directory
/// cannot be created.
pub fn init_logging_to_file(
    path: Option<PathBuf>,
    level: Option<LogLevel>,
) -> Result<(LoggingGuard, PathBuf), LoggingError>
{
    let log_file = match path {
        Some(path) => path,
        None => default_log_file()?,
    };

    let filter = filter_for(level.map(Into::into), Level::INFO);
    let (layer, guard) = file_layer(&log_file, LogFormat::Pretty, filter, false)?;
    Registry::default()
        .with(layer)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;

    Ok((LoggingGuard { _file: Some(guard) }, log_file))
}

fn default_log_file() -> Result<PathBuf, LoggingError>
{
    let today = Utc::now().format("%Y-%m-%d");
    let dir = env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")).map_or_else(env::temp_dir, |home| {
        PathBuf::from(home).join(".kdctl")
    });
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join(format!("{today}-kdctl.log")))
}

/// Filter priority: explicit level, then `RUST_LOG`, then `fallback`.
fn filter_for(explicit: Option<Level>, fallback: Level) -> EnvFilter
{
    if let Some(level) = explicit {
        return EnvFilter::new(level.to_string());
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback.to_string()))
}

fn console_layer<W>(format: LogFormat, writer: W, filter: EnvFilter) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(writer);

    match format {
        LogFormat::Pretty => layer.with_ansi(true).with_filter(filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_layer(
    path: &Path,
    format: LogFormat,
    filter: EnvFilter,
    rolling: bool,
) -> Result<(BoxedLayer, WorkerGuard), LoggingError>
{
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .ok_or_else(|| LoggingError::InitializationFailed(format!("not a file path: {}", path.display())))?;
    std::fs::create_dir_all(dir)?;

    // Dated file names already separate days, so file-only logs never roll.
    let appender = if rolling {
        tracing_appender::rolling::daily(dir, name)
    } else {
        tracing_appender::rolling::never(dir, name)
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(non_blocking);

    let layer = match format {
        LogFormat::Pretty => layer.with_ansi(false).with_filter(filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    };
    Ok((layer, guard))
}

fn init_logging_internal(
    format: LogFormat,
    default_level: Level,
    explicit_level: Option<Level>,
) -> Result<LoggingGuard, LoggingError>
{
    let mut layers = vec![console_layer(format, io::stderr, filter_for(explicit_level, default_level))];

    let mut guard = LoggingGuard::default();
    if let Some(path) = env::var_os("KDCTL_LOG_FILE").map(PathBuf::from) {
        let (layer, file_guard) = file_layer(&path, format, filter_for(explicit_level, default_level), true)?;
        layers.push(layer);
        guard._file = Some(file_guard);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;
    Ok(guard)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("dev").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("prod").unwrap(), LogFormat::Json);
        assert!(LogFormat::from_str("xml").is_err());
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("dbg").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("TRACE").unwrap(), LogLevel::Trace);
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_defaults()
    {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }
}
