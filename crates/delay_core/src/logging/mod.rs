//! Logging infrastructure for the delay engine.
//!
//! This module provides:
//! - Per-job loggers with file + callback dual output
//! - Compact mode with progress filtering
//! - Tail buffer for error diagnosis
//! - Integration with the `tracing` ecosystem
//!
//! # Example
//!
//! ```no_run
//! use delay_core::logging::{JobLogger, LogConfig};
//!
//! let logger = JobLogger::new("episode_01", "/path/to/logs", LogConfig::default(), None).unwrap();
//!
//! logger.phase("Analysis");
//! logger.section("Calculating Global Shift");
//! logger.success("Delays resolved");
//! ```

mod job_logger;
mod types;

pub use job_logger::{JobLogger, JobLoggerBuilder};
pub use types::{LogCallback, LogConfig, LogLevel, MessagePrefix};

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_filter(default_level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_filter_str()))
}

/// Initialize global tracing subscriber for application-wide logging.
///
/// Respects `RUST_LOG`, falling back to `default_level`. Output goes to
/// stderr. Should be called once at application startup.
pub fn init_tracing(default_level: LogLevel) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(env_filter(default_level))
        .init();
}

/// Initialize tracing with stderr plus a daily-rolling file in `log_dir`.
///
/// The returned guard flushes the background writer on drop; keep it alive
/// for the lifetime of the application.
pub fn init_tracing_with_file(default_level: LogLevel, log_dir: impl AsRef<Path>) -> WorkerGuard {
    let appender = tracing_appender::rolling::daily(log_dir.as_ref(), "delay_engine.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .with(env_filter(default_level))
        .init();

    guard
}

/// Initialize tracing for tests (only logs warnings and above).
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_strings() {
        assert_eq!(LogLevel::Debug.as_filter_str(), "debug");
        assert_eq!(LogLevel::Info.as_filter_str(), "info");
    }

    #[test]
    fn test_tracing_init_is_repeatable() {
        init_test_tracing();
        init_test_tracing();
    }
}
