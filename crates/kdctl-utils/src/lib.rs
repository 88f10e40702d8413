//! # kdctl Utilities
//!
//! Shared utilities and logging for kdctl.
//!
//! This crate provides the logging setup used by the `kdctl` binary, built on
//! `tracing`.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
