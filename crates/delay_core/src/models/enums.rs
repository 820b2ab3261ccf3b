//! Core enums used throughout the engine.

use serde::{Deserialize, Serialize};

/// Correlation algorithm selection.
///
/// Serialized with the human-readable names used in settings files; the
/// short keys (`scc`, `gcc_phat`, ...) are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CorrelationMethod {
    /// Standard time-domain cross-correlation.
    #[default]
    #[serde(rename = "Standard Correlation (SCC)", alias = "scc")]
    Scc,
    /// Generalized cross-correlation with phase transform.
    #[serde(rename = "Phase Correlation (GCC-PHAT)", alias = "gcc_phat")]
    GccPhat,
    /// Generalized cross-correlation with smoothed coherence transform.
    #[serde(rename = "GCC-SCOT", alias = "gcc_scot")]
    GccScot,
    /// Cross-correlation of individually whitened spectra.
    #[serde(rename = "Whitened Cross-Correlation", alias = "gcc_whiten")]
    GccWhiten,
    /// Onset-strength envelope correlation.
    #[serde(rename = "Onset Detection", alias = "onset")]
    Onset,
    /// Dynamic time warping over MFCC sequences.
    #[serde(rename = "DTW (Dynamic Time Warping)", alias = "dtw")]
    Dtw,
    /// Mean mel-spectrogram correlation.
    #[serde(rename = "Spectrogram Correlation", alias = "spectrogram")]
    Spectrogram,
}

impl CorrelationMethod {
    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scc => "Standard Correlation (SCC)",
            Self::GccPhat => "Phase Correlation (GCC-PHAT)",
            Self::GccScot => "GCC-SCOT",
            Self::GccWhiten => "Whitened Cross-Correlation",
            Self::Onset => "Onset Detection",
            Self::Dtw => "DTW (Dynamic Time Warping)",
            Self::Spectrogram => "Spectrogram Correlation",
        }
    }

    /// Short key used in configuration (`multi_corr_<key>`).
    pub fn key(&self) -> &'static str {
        match self {
            Self::Scc => "scc",
            Self::GccPhat => "gcc_phat",
            Self::GccScot => "gcc_scot",
            Self::GccWhiten => "gcc_whiten",
            Self::Onset => "onset",
            Self::Dtw => "dtw",
            Self::Spectrogram => "spectrogram",
        }
    }

    /// Configuration key that enables this method in multi-correlation mode.
    pub fn config_key(&self) -> String {
        format!("multi_corr_{}", self.key())
    }

    /// All methods in registry order.
    pub fn all() -> &'static [CorrelationMethod] {
        &[
            Self::Scc,
            Self::GccPhat,
            Self::GccScot,
            Self::GccWhiten,
            Self::Onset,
            Self::Dtw,
            Self::Spectrogram,
        ]
    }

    /// Resolve a human-readable name or a short key (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let needle = name.trim().to_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|m| m.name().to_lowercase() == needle || m.key() == needle)
    }
}

impl std::fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Policy for reducing accepted chunk delays to one final delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DelaySelectionMode {
    /// Most frequent rounded delay.
    #[default]
    #[serde(rename = "Mode (Most Common)", alias = "mode", alias = "mode_simple")]
    Mode,
    /// Dominant delay cluster.
    #[serde(rename = "Mode (Clustered)", alias = "mode_clustered")]
    ModeClustered,
    /// Earliest stable delay cluster.
    #[serde(rename = "Mode (Early Cluster)", alias = "mode_early_cluster")]
    ModeEarly,
    /// First run of consecutive agreeing chunks.
    #[serde(rename = "First Stable", alias = "first_stable")]
    FirstStable,
    /// Mean of raw delays.
    #[serde(rename = "Average", alias = "average")]
    Average,
}

impl DelaySelectionMode {
    /// Get the display name for this mode.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mode => "Mode (Most Common)",
            Self::ModeClustered => "Mode (Clustered)",
            Self::ModeEarly => "Mode (Early Cluster)",
            Self::FirstStable => "First Stable",
            Self::Average => "Average",
        }
    }

    /// Resolve a display name or alias.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "mode (most common)" | "mode" | "mode_simple" => Some(Self::Mode),
            "mode (clustered)" | "mode_clustered" => Some(Self::ModeClustered),
            "mode (early cluster)" | "mode_early_cluster" => Some(Self::ModeEarly),
            "first stable" | "first_stable" => Some(Self::FirstStable),
            "average" => Some(Self::Average),
            _ => None,
        }
    }
}

impl std::fmt::Display for DelaySelectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Audio conditioning applied before correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilteringMethod {
    /// No filtering applied.
    #[default]
    None,
    /// Butterworth band-pass over the speech band.
    #[serde(rename = "Dialogue Band-Pass Filter")]
    DialogueBandPass,
    /// Butterworth low-pass.
    #[serde(rename = "Low-Pass Filter")]
    LowPass,
}

impl std::fmt::Display for FilteringMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilteringMethod::None => write!(f, "None"),
            FilteringMethod::DialogueBandPass => write!(f, "Dialogue Band-Pass Filter"),
            FilteringMethod::LowPass => write!(f, "Low-Pass Filter"),
        }
    }
}

/// Which stem the separation worker should keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeparationMode {
    /// Separation disabled.
    #[default]
    None,
    /// Keep everything except vocals.
    Instrumental,
    /// Keep vocals only.
    Vocals,
}

impl SeparationMode {
    /// Stem name passed to the worker, `None` when disabled.
    pub fn target_stem(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Instrumental => Some("Instrumental"),
            Self::Vocals => Some("Vocals"),
        }
    }
}

/// Sync mode controls how negative delays are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncMode {
    /// Apply global shift to eliminate negative delays.
    #[default]
    #[serde(rename = "positive_only")]
    PositiveOnly,
    /// Report the shift but leave delays untouched.
    #[serde(rename = "allow_negative")]
    AllowNegative,
}

impl SyncMode {
    /// Get the display name for this mode.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PositiveOnly => "Positive Only (shift negatives)",
            Self::AllowNegative => "Allow Negative Delays",
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How stability outliers are identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierMode {
    /// Any chunk whose delay differs from the first accepted chunk.
    Any,
    /// Deviation from the mean beyond a fixed number of milliseconds.
    Threshold,
    /// Deviation from the mean beyond a multiple of the standard deviation.
    #[default]
    Sigma,
}

/// What the stepping diagnosis should do with its clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionMode {
    /// Correct only when every cluster passes validation.
    #[default]
    #[serde(alias = "strict")]
    Full,
    /// Correct using the valid clusters, ignoring invalid ones.
    Filtered,
    /// Never report stepping.
    Disabled,
}

impl std::fmt::Display for CorrectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrectionMode::Full => write!(f, "full"),
            CorrectionMode::Filtered => write!(f, "filtered"),
            CorrectionMode::Disabled => write!(f, "disabled"),
        }
    }
}

/// Behavior when two or more valid clusters disagree on the delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Use the most robust cluster and mark the result unverified.
    #[default]
    Nearest,
    /// Fail the source with a cluster disagreement error.
    #[serde(alias = "reject")]
    Abort,
}

impl std::fmt::Display for FallbackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackMode::Nearest => write!(f, "nearest"),
            FallbackMode::Abort => write!(f, "abort"),
        }
    }
}

/// Preset for cluster validation thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    Strict,
    #[default]
    Normal,
    Lenient,
    /// Use the thresholds written in the settings file.
    Custom,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_method_serializes_display_name() {
        let json = serde_json::to_string(&CorrelationMethod::GccPhat).unwrap();
        assert_eq!(json, "\"Phase Correlation (GCC-PHAT)\"");
    }

    #[test]
    fn correlation_method_accepts_key_alias() {
        let method: CorrelationMethod = serde_json::from_str("\"onset\"").unwrap();
        assert_eq!(method, CorrelationMethod::Onset);
    }

    #[test]
    fn correlation_method_resolves_names_and_keys() {
        for method in CorrelationMethod::all() {
            assert_eq!(CorrelationMethod::from_name(method.name()), Some(*method));
            assert_eq!(CorrelationMethod::from_name(method.key()), Some(*method));
        }
        assert_eq!(
            CorrelationMethod::from_name("  GCC-SCOT "),
            Some(CorrelationMethod::GccScot)
        );
        assert_eq!(CorrelationMethod::from_name("fourier magic"), None);
    }

    #[test]
    fn config_key_has_multi_corr_prefix() {
        assert_eq!(CorrelationMethod::Dtw.config_key(), "multi_corr_dtw");
    }

    #[test]
    fn selection_mode_aliases() {
        assert_eq!(
            DelaySelectionMode::from_name("mode_clustered"),
            Some(DelaySelectionMode::ModeClustered)
        );
        assert_eq!(
            DelaySelectionMode::from_name("First Stable"),
            Some(DelaySelectionMode::FirstStable)
        );
        let mode: DelaySelectionMode = serde_json::from_str("\"mode_early_cluster\"").unwrap();
        assert_eq!(mode, DelaySelectionMode::ModeEarly);
    }

    #[test]
    fn filtering_method_uses_display_names() {
        let f: FilteringMethod = serde_json::from_str("\"Low-Pass Filter\"").unwrap();
        assert_eq!(f, FilteringMethod::LowPass);
        assert_eq!(FilteringMethod::DialogueBandPass.to_string(), "Dialogue Band-Pass Filter");
    }

    #[test]
    fn strict_correction_mode_maps_to_full() {
        let mode: CorrectionMode = serde_json::from_str("\"strict\"").unwrap();
        assert_eq!(mode, CorrectionMode::Full);
    }

    #[test]
    fn sync_mode_serializes_snake_case() {
        let json = serde_json::to_string(&SyncMode::AllowNegative).unwrap();
        assert_eq!(json, "\"allow_negative\"");
    }
}
