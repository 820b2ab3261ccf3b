//! Delay selection strategies for choosing the final delay from chunk measurements.
//!
//! Each strategy reduces the accepted chunks (and, for the cluster-aware
//! modes, the diagnoser's valid clusters) to one `DelayResult`. When a
//! strategy's precondition is not met it substitutes a simpler one and
//! marks the result with `fallback_used`.

mod average;
mod first_stable;
mod mode;
mod mode_clustered;
mod mode_early;

pub use average::AverageSelector;
pub use first_stable::FirstStableSelector;
pub use mode::ModeSelector;
pub use mode_clustered::ModeClusteredSelector;
pub use mode_early::ModeEarlySelector;

use super::diagnosis::{ClusterInfo, DriftDiagnosis};
use super::types::{accepted, AnalysisError, AnalysisResult, ChunkResult, DelayResult};
use crate::config::SelectionSettings;
use crate::models::DelaySelectionMode;

/// Configuration for delay selectors.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Minimum accepted chunks required for selection.
    pub min_accepted_chunks: usize,
    /// [First Stable] Minimum consecutive chunks for stability.
    pub first_stable_min_chunks: usize,
    /// [First Stable] Skip segments shorter than the minimum.
    pub first_stable_skip_unstable: bool,
    /// [Early Cluster] Number of early chunks to check.
    pub early_cluster_window: usize,
    /// [Early Cluster] Minimum chunks in early window.
    pub early_cluster_threshold: usize,
    /// Tolerance for clustering rounded delays (ms).
    pub cluster_tolerance_ms: i64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self::from(&SelectionSettings::default())
    }
}

impl From<&SelectionSettings> for SelectorConfig {
    fn from(settings: &SelectionSettings) -> Self {
        Self {
            min_accepted_chunks: settings.min_accepted_chunks,
            first_stable_min_chunks: settings.first_stable_min_chunks,
            first_stable_skip_unstable: settings.first_stable_skip_unstable,
            early_cluster_window: settings.early_cluster_window,
            early_cluster_threshold: settings.early_cluster_threshold,
            cluster_tolerance_ms: settings.cluster_tolerance_ms,
        }
    }
}

/// Trait for delay selection strategies.
///
/// Implementations receive only accepted chunks in chronological order and
/// the valid clusters of the diagnosis (possibly empty).
pub trait DelaySelector: Send + Sync {
    /// Display name of the strategy.
    fn name(&self) -> &'static str;

    /// Returns `None` if no selection can be made (e.g., too few chunks).
    fn select(
        &self,
        chunks: &[ChunkResult],
        clusters: &[ClusterInfo],
        config: &SelectorConfig,
    ) -> Option<DelayResult>;
}

/// Create a delay selector for the given mode.
pub fn get_selector(mode: DelaySelectionMode) -> Box<dyn DelaySelector> {
    match mode {
        DelaySelectionMode::Mode => Box::new(ModeSelector),
        DelaySelectionMode::ModeClustered => Box::new(ModeClusteredSelector),
        DelaySelectionMode::ModeEarly => Box::new(ModeEarlySelector),
        DelaySelectionMode::FirstStable => Box::new(FirstStableSelector),
        DelaySelectionMode::Average => Box::new(AverageSelector),
    }
}

/// Select the final delay for one source.
///
/// `chunks` is the full chunk list; only accepted chunks are used. With fewer
/// than two chunks in total, a single accepted chunk is allowed through
/// `First Stable` and the result is flagged as an unverified fallback.
pub fn select_delay(
    chunks: &[ChunkResult],
    diagnosis: Option<&DriftDiagnosis>,
    settings: &SelectionSettings,
) -> AnalysisResult<DelayResult> {
    let accepted_chunks = accepted(chunks);
    let config = SelectorConfig::from(settings);
    let no_result = || AnalysisError::NoAcceptedChunks {
        accepted: accepted_chunks.len(),
        required: config.min_accepted_chunks,
        total: chunks.len(),
    };

    if chunks.len() < 2 {
        let single = SelectorConfig {
            min_accepted_chunks: 1,
            first_stable_min_chunks: 1,
            ..config.clone()
        };
        return FirstStableSelector
            .select(&accepted_chunks, &[], &single)
            .map(|result| {
                let mut result = result.with_fallback().with_details(format!(
                    "single chunk ({} of 2 required chunks available)",
                    chunks.len()
                ));
                result.unverified = true;
                result
            })
            .ok_or_else(no_result);
    }

    if accepted_chunks.len() < config.min_accepted_chunks {
        return Err(no_result());
    }

    let clusters: Vec<ClusterInfo> = diagnosis
        .map(|d| d.valid_cluster_details().into_iter().cloned().collect())
        .unwrap_or_default();

    get_selector(settings.delay_selection_mode)
        .select(&accepted_chunks, &clusters, &config)
        .ok_or_else(no_result)
}

/// Mean raw delay of a chunk group.
fn raw_mean<'a>(chunks: impl IntoIterator<Item = &'a ChunkResult>) -> Option<(f64, usize)> {
    let (sum, count) = chunks
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), c| (sum + c.raw_delay_ms, n + 1));
    (count > 0).then(|| (sum / count as f64, count))
}

/// Re-label a substituted result.
fn as_fallback(result: DelayResult, primary: &str) -> DelayResult {
    let details = match &result.details {
        Some(details) => format!("fallback from {}: {}", primary, details),
        None => format!("fallback from {}", primary),
    };
    result.with_fallback().with_details(details)
}
