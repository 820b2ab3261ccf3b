//! Logging types and configuration.

use serde::{Deserialize, Serialize};

use crate::config::LoggingSettings;

/// Log level for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace-level debugging (very verbose).
    Trace,
    /// Debug information.
    Debug,
    /// General information.
    #[default]
    Info,
    /// Warnings.
    Warn,
    /// Errors.
    Error,
}

impl LogLevel {
    /// Convert to tracing level.
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }

    /// Filter directive understood by `EnvFilter`.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration for logging behavior.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to output.
    pub level: LogLevel,
    /// Use compact mode (filter progress, show tail on error).
    pub compact: bool,
    /// Progress update step percentage (only log progress at these intervals).
    pub progress_step: u32,
    /// Number of lines to show on error (tail).
    pub error_tail: usize,
    /// Show timestamps in log output.
    pub show_timestamps: bool,
    /// Forward every line to `tracing` as well.
    pub mirror_to_tracing: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            compact: true,
            progress_step: 20,
            error_tail: 20,
            show_timestamps: true,
            mirror_to_tracing: true,
        }
    }
}

impl LogConfig {
    /// Create a debug configuration (verbose, no compact).
    pub fn debug() -> Self {
        Self {
            level: LogLevel::Debug,
            compact: false,
            progress_step: 10,
            error_tail: 50,
            ..Self::default()
        }
    }
}

impl From<&LoggingSettings> for LogConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            level: settings.level,
            compact: settings.compact,
            progress_step: settings.progress_step.max(1),
            error_tail: settings.error_tail as usize,
            ..Self::default()
        }
    }
}

/// Callback receiving each formatted log line.
pub type LogCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Message prefix types for consistent formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePrefix {
    /// Shell command: `$ command`
    Command,
    /// Phase marker: `=== Phase ===`
    Phase,
    /// Section marker: `--- Section ---`
    Section,
    /// Success: `[SUCCESS]`
    Success,
    /// Warning: `[WARNING]`
    Warning,
    /// Error: `[ERROR]`
    Error,
    /// No prefix
    None,
}

impl MessagePrefix {
    /// Format a message with this prefix.
    pub fn format(&self, message: &str) -> String {
        match self {
            MessagePrefix::Command => format!("$ {}", message),
            MessagePrefix::Phase => format!("=== {} ===", message),
            MessagePrefix::Section => format!("--- {} ---", message),
            MessagePrefix::Success => format!("[SUCCESS] {}", message),
            MessagePrefix::Warning => format!("[WARNING] {}", message),
            MessagePrefix::Error => format!("[ERROR] {}", message),
            MessagePrefix::None => message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_format() {
        assert_eq!(
            MessagePrefix::Section.format("Calculating Global Shift"),
            "--- Calculating Global Shift ---"
        );
        assert_eq!(MessagePrefix::Phase.format("Analysis"), "=== Analysis ===");
        assert_eq!(MessagePrefix::None.format("plain"), "plain");
    }

    #[test]
    fn log_config_from_settings() {
        let mut settings = LoggingSettings::default();
        settings.progress_step = 0;
        settings.error_tail = 7;
        let config = LogConfig::from(&settings);
        assert_eq!(config.progress_step, 1);
        assert_eq!(config.error_tail, 7);
    }
}
