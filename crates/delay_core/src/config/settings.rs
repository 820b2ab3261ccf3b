//! Settings struct with TOML-based sections.
//!
//! Settings are organized into logical sections that map to TOML tables.
//! The loaded value is immutable for the duration of a job and is passed by
//! reference into every analysis stage.

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;
use crate::models::{
    CorrectionMode, DelaySelectionMode, FallbackMode, FilteringMethod, OutlierMode, QualityMode,
    SeparationMode, SyncMode,
};

/// Root settings structure containing all configuration sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub correlation: CorrelationSettings,

    #[serde(default)]
    pub chunks: ChunkSettings,

    #[serde(default)]
    pub filtering: FilterSettings,

    #[serde(default)]
    pub multi_correlation: MultiCorrelationSettings,

    #[serde(default)]
    pub separation: SeparationSettings,

    #[serde(default)]
    pub drift: DriftSettings,

    #[serde(default)]
    pub stepping: SteppingSettings,

    #[serde(default)]
    pub stability: StabilitySettings,

    #[serde(default)]
    pub selection: SelectionSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Decoder and algorithm settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationSettings {
    /// Sample rate every source is decoded to.
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,

    /// Use the soxr resampler in ffmpeg.
    #[serde(default)]
    pub use_soxr_resampler: bool,

    /// Algorithm name or short key (see `CorrelationMethod`).
    #[serde(default = "default_correlation_method")]
    pub correlation_method: String,

    /// Minimum confidence for a chunk to be accepted (0-100).
    #[serde(default = "default_match_threshold")]
    pub match_threshold_pct: f64,

    /// Refine correlation peaks with a parabolic fit.
    #[serde(default = "default_true")]
    pub audio_peak_fit: bool,

    /// Worker threads for chunk correlation (0 = one per core).
    #[serde(default)]
    pub max_workers: usize,
}

fn default_sample_rate() -> u32 {
    48000
}

fn default_correlation_method() -> String {
    "Standard Correlation (SCC)".to_string()
}

fn default_match_threshold() -> f64 {
    50.0
}

fn default_true() -> bool {
    true
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate(),
            use_soxr_resampler: false,
            correlation_method: default_correlation_method(),
            match_threshold_pct: default_match_threshold(),
            audio_peak_fit: true,
            max_workers: 0,
        }
    }
}

/// Chunk layout over the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSettings {
    #[serde(default = "default_chunk_count")]
    pub scan_chunk_count: u32,

    /// Chunk length in seconds.
    #[serde(default = "default_chunk_duration")]
    pub scan_chunk_duration: f64,

    #[serde(default = "default_scan_start")]
    pub scan_start_percentage: f64,

    #[serde(default = "default_scan_end")]
    pub scan_end_percentage: f64,
}

fn default_chunk_count() -> u32 {
    10
}

fn default_chunk_duration() -> f64 {
    15.0
}

fn default_scan_start() -> f64 {
    5.0
}

fn default_scan_end() -> f64 {
    95.0
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            scan_chunk_count: default_chunk_count(),
            scan_chunk_duration: default_chunk_duration(),
            scan_start_percentage: default_scan_start(),
            scan_end_percentage: default_scan_end(),
        }
    }
}

/// Pre-correlation filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(default)]
    pub filtering_method: FilteringMethod,

    /// Low edge of the dialogue band (Hz).
    #[serde(default = "default_low_cutoff")]
    pub filter_low_cutoff_hz: f64,

    /// High edge of the dialogue band, also the low-pass cutoff (Hz).
    #[serde(default = "default_high_cutoff")]
    pub filter_high_cutoff_hz: f64,

    /// Butterworth order.
    #[serde(default = "default_filter_order")]
    pub filter_order: usize,
}

fn default_low_cutoff() -> f64 {
    300.0
}

fn default_high_cutoff() -> f64 {
    3400.0
}

fn default_filter_order() -> usize {
    5
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            filtering_method: FilteringMethod::None,
            filter_low_cutoff_hz: default_low_cutoff(),
            filter_high_cutoff_hz: default_high_cutoff(),
            filter_order: default_filter_order(),
        }
    }
}

/// Multi-correlation comparison mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiCorrelationSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub multi_corr_scc: bool,

    #[serde(default = "default_true")]
    pub multi_corr_gcc_phat: bool,

    #[serde(default)]
    pub multi_corr_gcc_scot: bool,

    #[serde(default)]
    pub multi_corr_gcc_whiten: bool,

    #[serde(default)]
    pub multi_corr_onset: bool,

    #[serde(default)]
    pub multi_corr_dtw: bool,

    #[serde(default)]
    pub multi_corr_spectrogram: bool,
}

impl Default for MultiCorrelationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            multi_corr_scc: true,
            multi_corr_gcc_phat: true,
            multi_corr_gcc_scot: false,
            multi_corr_gcc_whiten: false,
            multi_corr_onset: false,
            multi_corr_dtw: false,
            multi_corr_spectrogram: false,
        }
    }
}

impl MultiCorrelationSettings {
    /// Look up a `multi_corr_<key>` flag by its configuration key.
    pub fn is_enabled(&self, config_key: &str) -> bool {
        match config_key {
            "multi_corr_scc" => self.multi_corr_scc,
            "multi_corr_gcc_phat" => self.multi_corr_gcc_phat,
            "multi_corr_gcc_scot" => self.multi_corr_gcc_scot,
            "multi_corr_gcc_whiten" => self.multi_corr_gcc_whiten,
            "multi_corr_onset" => self.multi_corr_onset,
            "multi_corr_dtw" => self.multi_corr_dtw,
            "multi_corr_spectrogram" => self.multi_corr_spectrogram,
            _ => false,
        }
    }
}

/// Out-of-process source separation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationSettings {
    #[serde(default)]
    pub mode: SeparationMode,

    /// Model filename handed to the worker.
    #[serde(default = "default_separation_model")]
    pub model: String,

    /// Directory holding separation models (empty = worker default).
    #[serde(default)]
    pub model_dir: String,

    /// `auto`, `cpu`, or a device name understood by the worker.
    #[serde(default = "default_separation_device")]
    pub device: String,

    /// Seconds before the worker is killed (<= 0 means the hard maximum).
    #[serde(default = "default_separation_timeout")]
    pub timeout_s: f64,

    /// Worker program and leading arguments; the JSON request is appended.
    #[serde(default = "default_separation_worker")]
    pub worker_command: Vec<String>,
}

fn default_separation_model() -> String {
    "default".to_string()
}

fn default_separation_device() -> String {
    "auto".to_string()
}

fn default_separation_timeout() -> f64 {
    900.0
}

fn default_separation_worker() -> Vec<String> {
    vec![
        "python3".to_string(),
        "-m".to_string(),
        "audio_separator_worker".to_string(),
    ]
}

impl Default for SeparationSettings {
    fn default() -> Self {
        Self {
            mode: SeparationMode::None,
            model: default_separation_model(),
            model_dir: String::new(),
            device: default_separation_device(),
            timeout_s: default_separation_timeout(),
            worker_command: default_separation_worker(),
        }
    }
}

/// Drift classification thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSettings {
    /// Accepted chunks required before any pattern is classified.
    #[serde(default = "default_drift_min_chunks")]
    pub min_accepted_chunks: usize,

    /// Width of the uniform band, in video frames.
    #[serde(default = "default_uniform_frames")]
    pub uniform_tolerance_frames: f64,

    /// Frame rate assumed when the source has no video track.
    #[serde(default = "default_framerate")]
    pub default_framerate: f64,

    #[serde(default = "default_pal_framerate")]
    pub pal_framerate: f64,

    #[serde(default = "default_pal_framerate_tolerance")]
    pub pal_framerate_tolerance: f64,

    /// Expected PAL speedup drift (ms per second).
    #[serde(default = "default_pal_drift_rate")]
    pub pal_drift_rate: f64,

    #[serde(default = "default_pal_drift_tolerance")]
    pub pal_drift_tolerance: f64,

    #[serde(default = "default_slope_lossy")]
    pub slope_threshold_lossy: f64,

    #[serde(default = "default_slope_lossless")]
    pub slope_threshold_lossless: f64,

    #[serde(default = "default_r2_lossy")]
    pub r2_threshold_lossy: f64,

    #[serde(default = "default_r2_lossless")]
    pub r2_threshold_lossless: f64,
}

fn default_drift_min_chunks() -> usize {
    6
}

fn default_uniform_frames() -> f64 {
    1.0
}

fn default_framerate() -> f64 {
    23.976
}

fn default_pal_framerate() -> f64 {
    25.0
}

fn default_pal_framerate_tolerance() -> f64 {
    0.1
}

fn default_pal_drift_rate() -> f64 {
    40.9
}

fn default_pal_drift_tolerance() -> f64 {
    5.0
}

fn default_slope_lossy() -> f64 {
    0.5
}

fn default_slope_lossless() -> f64 {
    0.1
}

fn default_r2_lossy() -> f64 {
    0.7
}

fn default_r2_lossless() -> f64 {
    0.9
}

impl Default for DriftSettings {
    fn default() -> Self {
        Self {
            min_accepted_chunks: default_drift_min_chunks(),
            uniform_tolerance_frames: default_uniform_frames(),
            default_framerate: default_framerate(),
            pal_framerate: default_pal_framerate(),
            pal_framerate_tolerance: default_pal_framerate_tolerance(),
            pal_drift_rate: default_pal_drift_rate(),
            pal_drift_tolerance: default_pal_drift_tolerance(),
            slope_threshold_lossy: default_slope_lossy(),
            slope_threshold_lossless: default_slope_lossless(),
            r2_threshold_lossy: default_r2_lossy(),
            r2_threshold_lossless: default_r2_lossless(),
        }
    }
}

/// Stepping clustering and cluster validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteppingSettings {
    /// DBSCAN neighbourhood radius (ms).
    #[serde(default = "default_dbscan_epsilon")]
    pub dbscan_epsilon_ms: f64,

    #[serde(default = "default_dbscan_min_samples")]
    pub dbscan_min_samples: usize,

    #[serde(default)]
    pub correction_mode: CorrectionMode,

    #[serde(default)]
    pub fallback_mode: FallbackMode,

    #[serde(default)]
    pub quality_mode: QualityMode,

    /// Thresholds used when `quality_mode = "custom"`.
    #[serde(default)]
    pub custom_thresholds: ClusterThresholds,
}

fn default_dbscan_epsilon() -> f64 {
    20.0
}

fn default_dbscan_min_samples() -> usize {
    2
}

impl Default for SteppingSettings {
    fn default() -> Self {
        Self {
            dbscan_epsilon_ms: default_dbscan_epsilon(),
            dbscan_min_samples: default_dbscan_min_samples(),
            correction_mode: CorrectionMode::Full,
            fallback_mode: FallbackMode::Nearest,
            quality_mode: QualityMode::Normal,
            custom_thresholds: ClusterThresholds::normal(),
        }
    }
}

impl SteppingSettings {
    /// Thresholds in effect for the configured quality mode.
    pub fn thresholds(&self) -> ClusterThresholds {
        match self.quality_mode {
            QualityMode::Strict => ClusterThresholds::strict(),
            QualityMode::Normal => ClusterThresholds::normal(),
            QualityMode::Lenient => ClusterThresholds::lenient(),
            QualityMode::Custom => self.custom_thresholds.clone(),
        }
    }
}

/// Per-cluster validation thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterThresholds {
    pub min_chunks_per_cluster: usize,
    /// Minimum share of accepted chunks (percent).
    pub min_cluster_percentage: f64,
    /// Minimum covered time including the last chunk's length (seconds).
    pub min_cluster_duration_s: f64,
    /// Minimum mean match quality.
    pub min_match_quality_pct: f64,
    /// Minimum worst-chunk match quality.
    pub min_worst_match_pct: f64,
    /// Valid clusters needed before a correction is trusted.
    pub min_total_clusters: usize,
}

impl ClusterThresholds {
    pub fn strict() -> Self {
        Self {
            min_chunks_per_cluster: 3,
            min_cluster_percentage: 10.0,
            min_cluster_duration_s: 30.0,
            min_match_quality_pct: 90.0,
            min_worst_match_pct: 75.0,
            min_total_clusters: 3,
        }
    }

    pub fn normal() -> Self {
        Self {
            min_chunks_per_cluster: 3,
            min_cluster_percentage: 5.0,
            min_cluster_duration_s: 20.0,
            min_match_quality_pct: 85.0,
            min_worst_match_pct: 60.0,
            min_total_clusters: 2,
        }
    }

    pub fn lenient() -> Self {
        Self {
            min_chunks_per_cluster: 2,
            min_cluster_percentage: 3.0,
            min_cluster_duration_s: 10.0,
            min_match_quality_pct: 75.0,
            min_worst_match_pct: 40.0,
            min_total_clusters: 2,
        }
    }
}

impl Default for ClusterThresholds {
    fn default() -> Self {
        Self::normal()
    }
}

/// Variance and outlier reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilitySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allowed max-min spread in ms; <= 0 flags any variance at all.
    #[serde(default)]
    pub variance_threshold_ms: f64,

    #[serde(default = "default_stability_min_chunks")]
    pub min_chunks: usize,

    #[serde(default)]
    pub outlier_mode: OutlierMode,

    /// Deviation in ms for `threshold` mode.
    #[serde(default = "default_outlier_threshold")]
    pub outlier_threshold_ms: f64,

    /// Standard-deviation multiple for `sigma` mode.
    #[serde(default = "default_outlier_sigma")]
    pub outlier_sigma: f64,
}

fn default_stability_min_chunks() -> usize {
    3
}

fn default_outlier_threshold() -> f64 {
    1.0
}

fn default_outlier_sigma() -> f64 {
    2.0
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            variance_threshold_ms: 0.0,
            min_chunks: default_stability_min_chunks(),
            outlier_mode: OutlierMode::Sigma,
            outlier_threshold_ms: default_outlier_threshold(),
            outlier_sigma: default_outlier_sigma(),
        }
    }
}

/// Final delay selection and global shift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionSettings {
    #[serde(default)]
    pub delay_selection_mode: DelaySelectionMode,

    #[serde(default = "default_min_accepted")]
    pub min_accepted_chunks: usize,

    #[serde(default = "default_first_stable_min")]
    pub first_stable_min_chunks: usize,

    #[serde(default = "default_true")]
    pub first_stable_skip_unstable: bool,

    #[serde(default = "default_early_window")]
    pub early_cluster_window: usize,

    #[serde(default = "default_early_threshold")]
    pub early_cluster_threshold: usize,

    /// Rounded delays within this many ms count as the same value.
    #[serde(default = "default_cluster_tolerance")]
    pub cluster_tolerance_ms: i64,

    #[serde(default)]
    pub sync_mode: SyncMode,
}

fn default_min_accepted() -> usize {
    3
}

fn default_first_stable_min() -> usize {
    3
}

fn default_early_window() -> usize {
    10
}

fn default_early_threshold() -> usize {
    5
}

fn default_cluster_tolerance() -> i64 {
    1
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            delay_selection_mode: DelaySelectionMode::Mode,
            min_accepted_chunks: default_min_accepted(),
            first_stable_min_chunks: default_first_stable_min(),
            first_stable_skip_unstable: true,
            early_cluster_window: default_early_window(),
            early_cluster_threshold: default_early_threshold(),
            cluster_tolerance_ms: default_cluster_tolerance(),
            sync_mode: SyncMode::PositiveOnly,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub level: LogLevel,

    /// Use compact log format.
    #[serde(default = "default_true")]
    pub compact: bool,

    /// Number of lines kept for error tails.
    #[serde(default = "default_error_tail")]
    pub error_tail: u32,

    /// Progress update step percentage.
    #[serde(default = "default_progress_step")]
    pub progress_step: u32,

    /// Folder for job logs.
    #[serde(default = "default_logs_folder")]
    pub logs_folder: String,
}

fn default_error_tail() -> u32 {
    20
}

fn default_progress_step() -> u32 {
    20
}

fn default_logs_folder() -> String {
    ".logs".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            compact: true,
            error_tail: default_error_tail(),
            progress_step: default_progress_step(),
            logs_folder: default_logs_folder(),
        }
    }
}

/// Config sections for atomic updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSection {
    Correlation,
    Chunks,
    Filtering,
    MultiCorrelation,
    Separation,
    Drift,
    Stepping,
    Stability,
    Selection,
    Logging,
}

impl ConfigSection {
    /// Get the TOML table name for this section.
    pub fn table_name(&self) -> &'static str {
        match self {
            ConfigSection::Correlation => "correlation",
            ConfigSection::Chunks => "chunks",
            ConfigSection::Filtering => "filtering",
            ConfigSection::MultiCorrelation => "multi_correlation",
            ConfigSection::Separation => "separation",
            ConfigSection::Drift => "drift",
            ConfigSection::Stepping => "stepping",
            ConfigSection::Stability => "stability",
            ConfigSection::Selection => "selection",
            ConfigSection::Logging => "logging",
        }
    }

    /// All sections in file order.
    pub fn all() -> &'static [ConfigSection] {
        &[
            ConfigSection::Correlation,
            ConfigSection::Chunks,
            ConfigSection::Filtering,
            ConfigSection::MultiCorrelation,
            ConfigSection::Separation,
            ConfigSection::Drift,
            ConfigSection::Stepping,
            ConfigSection::Stability,
            ConfigSection::Selection,
            ConfigSection::Logging,
        ]
    }

    /// Comment written above the section in generated files.
    pub fn description(&self) -> &'static str {
        match self {
            ConfigSection::Correlation => "Decoding and correlation algorithm",
            ConfigSection::Chunks => "Chunk layout across the timeline",
            ConfigSection::Filtering => "Filter applied before correlation",
            ConfigSection::MultiCorrelation => "Run several algorithms for comparison",
            ConfigSection::Separation => "Out-of-process source separation",
            ConfigSection::Drift => "Drift classification thresholds",
            ConfigSection::Stepping => "Stepping clusters and validation",
            ConfigSection::Stability => "Variance and outlier reporting",
            ConfigSection::Selection => "Final delay selection and global shift",
            ConfigSection::Logging => "Logging configuration",
        }
    }
}
