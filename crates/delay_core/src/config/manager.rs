//! Config manager for loading, validating, saving, and atomic updates.
//!
//! Key features:
//! - Atomic writes (write to temp file, then rename)
//! - Section-level updates (only modified section is changed)
//! - Range validation on load
//! - Preserves comments and formatting with toml_edit

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use toml_edit::{DocumentMut, Item};

use super::settings::{ConfigSection, EngineSettings};

/// Errors that can occur during config operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Failed to parse config for editing: {0}")]
    EditParseError(#[from] toml_edit::TomlError),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Check value ranges that serde defaults cannot express.
pub fn validate(settings: &EngineSettings) -> ConfigResult<()> {
    let corr = &settings.correlation;
    if corr.sample_rate_hz == 0 {
        return Err(invalid("correlation.sample_rate_hz", "must be positive"));
    }
    if !(0.0..=100.0).contains(&corr.match_threshold_pct) {
        return Err(invalid(
            "correlation.match_threshold_pct",
            "must be between 0 and 100",
        ));
    }

    let chunks = &settings.chunks;
    if chunks.scan_chunk_count == 0 {
        return Err(invalid("chunks.scan_chunk_count", "must be at least 1"));
    }
    if chunks.scan_chunk_duration <= 0.0 || !chunks.scan_chunk_duration.is_finite() {
        return Err(invalid("chunks.scan_chunk_duration", "must be positive"));
    }
    let start = chunks.scan_start_percentage;
    let end = chunks.scan_end_percentage;
    if !(0.0..=100.0).contains(&start) || !(0.0..=100.0).contains(&end) || start >= end {
        return Err(invalid(
            "chunks.scan_start_percentage",
            format!("window {start}..{end} must be ordered within 0..100"),
        ));
    }

    let filter = &settings.filtering;
    if filter.filter_low_cutoff_hz <= 0.0 || filter.filter_low_cutoff_hz >= filter.filter_high_cutoff_hz
    {
        return Err(invalid(
            "filtering.filter_low_cutoff_hz",
            "must be positive and below filter_high_cutoff_hz",
        ));
    }
    if filter.filter_order == 0 {
        return Err(invalid("filtering.filter_order", "must be at least 1"));
    }

    if settings.separation.worker_command.is_empty() {
        return Err(invalid("separation.worker_command", "must name a program"));
    }

    if settings.stepping.dbscan_epsilon_ms <= 0.0 {
        return Err(invalid("stepping.dbscan_epsilon_ms", "must be positive"));
    }
    if settings.drift.default_framerate <= 0.0 {
        return Err(invalid("drift.default_framerate", "must be positive"));
    }

    Ok(())
}

/// Manages engine configuration.
///
/// Handles loading, saving, and atomic section-level updates.
pub struct ConfigManager {
    /// Path to the config file.
    config_path: PathBuf,
    /// Current settings loaded in memory.
    settings: EngineSettings,
}

impl ConfigManager {
    /// Create a new config manager with the given config file path.
    ///
    /// Does not load the config - call `load()` or `load_or_create()` after.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            settings: EngineSettings::default(),
        }
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Get a reference to the current settings.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Get a mutable reference to the current settings.
    ///
    /// Changes made here are only in memory until `save()` or
    /// `update_section()` is called.
    pub fn settings_mut(&mut self) -> &mut EngineSettings {
        &mut self.settings
    }

    /// Load config from file.
    ///
    /// Returns error if file doesn't exist or a value is out of range.
    pub fn load(&mut self) -> ConfigResult<()> {
        if !self.config_path.exists() {
            return Err(ConfigError::NotFound(self.config_path.clone()));
        }

        let content = fs::read_to_string(&self.config_path)?;
        self.settings = parse_and_validate(&content)?;
        Ok(())
    }

    /// Load config from file, creating with defaults if it doesn't exist.
    ///
    /// Files missing keys or carrying unknown sections are rewritten.
    pub fn load_or_create(&mut self) -> ConfigResult<()> {
        if self.config_path.exists() {
            let content = fs::read_to_string(&self.config_path)?;
            let (settings, was_modified) = parse_validate_and_clean(&content)?;
            self.settings = settings;

            if was_modified {
                self.save()?;
            }
        } else {
            if let Some(parent) = self.config_path.parent() {
                fs::create_dir_all(parent)?;
            }

            self.settings = EngineSettings::default();
            self.save()?;
        }
        Ok(())
    }

    /// Get the logs folder path.
    pub fn logs_folder(&self) -> PathBuf {
        PathBuf::from(&self.settings.logging.logs_folder)
    }

    /// Save the entire config atomically.
    pub fn save(&self) -> ConfigResult<()> {
        let content = self.generate_config_with_comments()?;
        self.atomic_write(&content)?;
        Ok(())
    }

    /// Update a specific section atomically.
    ///
    /// Re-reads the file from disk, replaces only the given table, and
    /// writes back atomically. Comments elsewhere in the file survive.
    pub fn update_section(&mut self, section: ConfigSection) -> ConfigResult<()> {
        let current_content = if self.config_path.exists() {
            fs::read_to_string(&self.config_path)?
        } else {
            String::new()
        };

        let mut doc: DocumentMut = if current_content.is_empty() {
            DocumentMut::new()
        } else {
            current_content.parse()?
        };

        let s = &self.settings;
        let section_toml = match section {
            ConfigSection::Correlation => toml::to_string_pretty(&s.correlation)?,
            ConfigSection::Chunks => toml::to_string_pretty(&s.chunks)?,
            ConfigSection::Filtering => toml::to_string_pretty(&s.filtering)?,
            ConfigSection::MultiCorrelation => toml::to_string_pretty(&s.multi_correlation)?,
            ConfigSection::Separation => toml::to_string_pretty(&s.separation)?,
            ConfigSection::Drift => toml::to_string_pretty(&s.drift)?,
            ConfigSection::Stepping => toml::to_string_pretty(&s.stepping)?,
            ConfigSection::Stability => toml::to_string_pretty(&s.stability)?,
            ConfigSection::Selection => toml::to_string_pretty(&s.selection)?,
            ConfigSection::Logging => toml::to_string_pretty(&s.logging)?,
        };

        let section_doc: DocumentMut = section_toml.parse()?;
        let section_table = section_doc.as_table().clone();

        doc[section.table_name()] = Item::Table(section_table);

        self.atomic_write(&doc.to_string())?;

        Ok(())
    }

    /// Generate config content with a comment above every section.
    fn generate_config_with_comments(&self) -> ConfigResult<String> {
        let body = toml::to_string_pretty(&self.settings)?;

        let mut output = String::new();
        output.push_str("# Delay engine configuration\n");
        output.push_str(
            "# This file is auto-generated. Comments may be preserved on section updates.\n\n",
        );

        for line in body.lines() {
            if let Some(section) = ConfigSection::all()
                .iter()
                .find(|s| line.trim() == format!("[{}]", s.table_name()))
            {
                output.push_str(&format!("# {}\n", section.description()));
            }
            output.push_str(line);
            output.push('\n');
        }

        Ok(output)
    }

    /// Write content to config file atomically.
    fn atomic_write(&self, content: &str) -> io::Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Same directory so the rename stays on one filesystem
        let temp_path = self.config_path.with_extension("toml.tmp");

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

/// Parse settings from TOML text and check value ranges.
pub fn parse_and_validate(content: &str) -> ConfigResult<EngineSettings> {
    let settings: EngineSettings = toml::from_str(content)?;
    validate(&settings)?;
    Ok(settings)
}

/// Parse and validate, reporting whether the file needs rewriting.
fn parse_validate_and_clean(content: &str) -> ConfigResult<(EngineSettings, bool)> {
    let doc: DocumentMut = content.parse()?;
    let settings = parse_and_validate(content)?;

    let has_unknown = doc.iter().any(|(key, _)| {
        !ConfigSection::all()
            .iter()
            .any(|section| section.table_name() == key)
    });

    // Anything missing shows up as extra keys after re-serializing.
    let reparsed: DocumentMut = toml::to_string_pretty(&settings)?.parse()?;
    let missing_keys = reparsed.iter().any(|(name, item)| match (item, doc.get(name)) {
        (Item::Table(expected), Some(Item::Table(actual))) => {
            expected.iter().any(|(key, _)| !actual.contains_key(key))
        }
        (_, None) => true,
        _ => false,
    });

    Ok((settings, has_unknown || missing_keys))
}
