//! Configuration management for the delay engine.
//!
//! This module provides:
//! - TOML-based configuration with logical sections
//! - Atomic file writes (write to temp, then rename)
//! - Section-level updates (only changed section is modified)
//! - Range validation on load
//!
//! # Example
//!
//! ```no_run
//! use delay_core::config::{ConfigManager, ConfigSection};
//!
//! let mut config = ConfigManager::new(".config/settings.toml");
//! config.load_or_create().unwrap();
//!
//! println!("Chunks: {}", config.settings().chunks.scan_chunk_count);
//!
//! config.settings_mut().correlation.match_threshold_pct = 60.0;
//! config.update_section(ConfigSection::Correlation).unwrap();
//! ```

mod manager;
mod settings;

pub use manager::{parse_and_validate, validate, ConfigError, ConfigManager, ConfigResult};
pub use settings::{
    ChunkSettings, ClusterThresholds, ConfigSection, CorrelationSettings, DriftSettings,
    EngineSettings, FilterSettings, LoggingSettings, MultiCorrelationSettings, SelectionSettings,
    SeparationSettings, StabilitySettings, SteppingSettings,
};
