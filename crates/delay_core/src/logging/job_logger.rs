//! Per-job logger with file and callback output.
//!
//! Each job gets its own logger that:
//! - Writes to a dedicated log file (unless detached)
//! - Sends messages to a callback (if provided)
//! - Supports compact mode with progress filtering
//! - Maintains a tail buffer for error diagnosis
//! - Mirrors lines to `tracing` under the `delay_core::job` target

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;

use super::types::{LogCallback, LogConfig, LogLevel, MessagePrefix};

/// Per-job logger with dual output (file + callback).
pub struct JobLogger {
    /// Job name for identification.
    job_name: String,
    /// Path to log file, `None` for detached loggers.
    log_path: Option<PathBuf>,
    file_writer: Arc<Mutex<Option<BufWriter<File>>>>,
    callback: Arc<Mutex<Option<LogCallback>>>,
    config: LogConfig,
    /// Recent lines, replayed after an error.
    tail_buffer: Arc<Mutex<VecDeque<String>>>,
    /// Last progress value logged (for compact mode filtering).
    last_progress: Arc<Mutex<u32>>,
}

impl JobLogger {
    /// Create a new job logger writing `<log_dir>/<job_name>.log`.
    pub fn new(
        job_name: impl Into<String>,
        log_dir: impl AsRef<Path>,
        config: LogConfig,
        callback: Option<LogCallback>,
    ) -> std::io::Result<Self> {
        let job_name = job_name.into();
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)?;

        let log_path = log_dir.join(format!("{}.log", sanitize_filename(&job_name)));
        let file = File::create(&log_path)?;

        let mut logger = Self::detached(job_name, config, callback);
        logger.log_path = Some(log_path);
        *logger.file_writer.lock() = Some(BufWriter::new(file));
        Ok(logger)
    }

    /// Create a logger with no log file.
    ///
    /// Lines still reach the callback, the tail buffer and `tracing`.
    pub fn detached(
        job_name: impl Into<String>,
        config: LogConfig,
        callback: Option<LogCallback>,
    ) -> Self {
        let tail_capacity = config.error_tail.max(1);
        Self {
            job_name: job_name.into(),
            log_path: None,
            file_writer: Arc::new(Mutex::new(None)),
            callback: Arc::new(Mutex::new(callback)),
            config,
            tail_buffer: Arc::new(Mutex::new(VecDeque::with_capacity(tail_capacity))),
            last_progress: Arc::new(Mutex::new(0)),
        }
    }

    /// Get the job name.
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Get the log file path.
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Log a message at the specified level.
    pub fn log(&self, level: LogLevel, message: &str) {
        if level < self.config.level {
            return;
        }

        self.remember(message);
        if self.config.mirror_to_tracing {
            mirror(level, &self.job_name, message);
        }
        let formatted = self.format_message(message);
        self.output(&formatted);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn warn(&self, message: &str) {
        let msg = MessagePrefix::Warning.format(message);
        self.log(LogLevel::Warn, &msg);
    }

    pub fn error(&self, message: &str) {
        let msg = MessagePrefix::Error.format(message);
        self.log(LogLevel::Error, &msg);
    }

    /// Log a command being executed.
    pub fn command(&self, command: &str) {
        let msg = MessagePrefix::Command.format(command);
        self.log(LogLevel::Debug, &msg);
    }

    /// Log a phase marker.
    pub fn phase(&self, phase_name: &str) {
        let msg = MessagePrefix::Phase.format(phase_name);
        self.log(LogLevel::Info, &msg);
    }

    /// Log a section marker.
    pub fn section(&self, section_name: &str) {
        let msg = MessagePrefix::Section.format(section_name);
        self.log(LogLevel::Info, &msg);
    }

    pub fn success(&self, message: &str) {
        let msg = MessagePrefix::Success.format(message);
        self.log(LogLevel::Info, &msg);
    }

    /// Log progress update (filtered in compact mode).
    ///
    /// Returns true if the progress was logged, false if filtered.
    pub fn progress(&self, percent: u32) -> bool {
        if self.config.compact {
            let mut last = self.last_progress.lock();
            let step = self.config.progress_step.max(1);

            let current_step = (percent / step) * step;
            let last_step = (*last / step) * step;

            if current_step <= last_step && percent < 100 {
                return false;
            }
            *last = percent;
        }

        let msg = format!("Progress: {}%", percent);
        self.log(LogLevel::Info, &msg);
        true
    }

    /// Log output from an external tool.
    ///
    /// In compact mode, these are only added to tail buffer.
    pub fn output_line(&self, line: &str, is_stderr: bool) {
        self.remember(line);

        if self.config.compact {
            return;
        }

        let prefix = if is_stderr { "[stderr] " } else { "" };
        let msg = format!("{}{}", prefix, line);
        self.output(&self.format_message(&msg));
    }

    /// Show the tail buffer (typically after an error).
    pub fn show_tail(&self, header: &str) {
        let lines = self.get_tail();
        if lines.is_empty() {
            return;
        }

        self.output(&self.format_message(&format!("[{}/tail]", header)));
        for line in &lines {
            self.output(&self.format_message(line));
        }
    }

    /// Clear the tail buffer.
    pub fn clear_tail(&self) {
        self.tail_buffer.lock().clear();
    }

    /// Get the current tail buffer contents.
    pub fn get_tail(&self) -> Vec<String> {
        self.tail_buffer.lock().iter().cloned().collect()
    }

    /// Flush the log file.
    pub fn flush(&self) {
        if let Some(ref mut writer) = *self.file_writer.lock() {
            let _ = writer.flush();
        }
    }

    /// Close the logger and release resources.
    pub fn close(&self) {
        self.flush();
        *self.file_writer.lock() = None;
    }

    fn remember(&self, line: &str) {
        let mut buffer = self.tail_buffer.lock();
        if buffer.len() >= self.config.error_tail.max(1) {
            buffer.pop_front();
        }
        buffer.push_back(line.to_string());
    }

    /// Format a message with timestamp (if enabled).
    fn format_message(&self, message: &str) -> String {
        if self.config.show_timestamps {
            let timestamp = Local::now().format("%H:%M:%S");
            format!("[{}] {}", timestamp, message)
        } else {
            message.to_string()
        }
    }

    fn output(&self, formatted: &str) {
        if let Some(ref mut writer) = *self.file_writer.lock() {
            let _ = writeln!(writer, "{}", formatted);
        }

        if let Some(ref callback) = *self.callback.lock() {
            callback(formatted);
        }
    }
}

impl Drop for JobLogger {
    fn drop(&mut self) {
        self.close();
    }
}

fn mirror(level: LogLevel, job: &str, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(target: "delay_core::job", job, "{}", message),
        LogLevel::Debug => tracing::debug!(target: "delay_core::job", job, "{}", message),
        LogLevel::Info => tracing::info!(target: "delay_core::job", job, "{}", message),
        LogLevel::Warn => tracing::warn!(target: "delay_core::job", job, "{}", message),
        LogLevel::Error => tracing::error!(target: "delay_core::job", job, "{}", message),
    }
}

/// Sanitize a string to be safe for use as a filename.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

/// Builder for creating JobLogger with fluent API.
pub struct JobLoggerBuilder {
    job_name: String,
    log_dir: Option<PathBuf>,
    config: LogConfig,
    callback: Option<LogCallback>,
}

impl JobLoggerBuilder {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            log_dir: None,
            config: LogConfig::default(),
            callback: None,
        }
    }

    /// Write the log file into this directory.
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn compact(mut self, compact: bool) -> Self {
        self.config.compact = compact;
        self
    }

    pub fn callback(mut self, callback: LogCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Build the JobLogger.
    pub fn build(self) -> std::io::Result<JobLogger> {
        match self.log_dir {
            Some(dir) => JobLogger::new(self.job_name, dir, self.config, self.callback),
            None => Ok(JobLogger::detached(
                self.job_name,
                self.config,
                self.callback,
            )),
        }
    }
}
