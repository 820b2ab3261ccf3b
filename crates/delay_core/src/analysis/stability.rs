//! Stability metrics for accepted chunk delays.
//!
//! Independent of the diagnosis type: reports spread, standard deviation and
//! outliers. When the diagnosis found stepping, variance and outliers are
//! measured inside each cluster, since the jumps between clusters are
//! expected. All functions are pure.

use serde::{Deserialize, Serialize};

use super::diagnosis::DriftDiagnosis;
use super::types::ChunkResult;
use crate::config::StabilitySettings;
use crate::models::OutlierMode;

/// Spread below this counts as no variance at all.
const FLOAT_TOLERANCE_MS: f64 = 0.0001;

/// Outliers listed in a result; `outlier_count` still counts all of them.
const MAX_REPORTED_OUTLIERS: usize = 10;

/// A chunk whose delay deviates from its reference value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityOutlier {
    /// 1-based chunk number.
    pub chunk_index: usize,
    pub time_s: f64,
    pub delay_ms: f64,
    pub deviation_ms: f64,
    /// Owning cluster when measured per cluster.
    pub cluster_id: Option<usize>,
}

/// Variance found inside one stepping cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterIssue {
    pub cluster_id: usize,
    pub chunk_count: usize,
    pub max_variance_ms: f64,
    pub std_dev_ms: f64,
}

/// Stability report for one source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StabilityResult {
    pub source: String,
    pub variance_detected: bool,
    /// Max minus min accepted delay.
    pub max_variance_ms: f64,
    /// Sample standard deviation.
    pub std_dev_ms: f64,
    pub mean_delay_ms: f64,
    pub min_delay_ms: f64,
    pub max_delay_ms: f64,
    pub chunk_count: usize,
    pub outlier_count: usize,
    pub outliers: Vec<StabilityOutlier>,
    pub cluster_count: usize,
    pub is_stepping: bool,
    pub cluster_issues: Vec<ClusterIssue>,
    /// Why the analysis was skipped, if it was.
    pub reason: Option<String>,
}

impl StabilityResult {
    /// Short status for the summary log.
    pub fn status(&self) -> &'static str {
        if self.reason.is_some() {
            "SKIPPED"
        } else if self.variance_detected {
            "VARIANCE"
        } else {
            "STABLE"
        }
    }
}

/// Analyze the accepted chunks of one source.
pub fn analyze_stability(
    source: &str,
    chunks: &[ChunkResult],
    diagnosis: Option<&DriftDiagnosis>,
    settings: &StabilitySettings,
) -> StabilityResult {
    let accepted: Vec<&ChunkResult> = chunks.iter().filter(|c| c.accepted).collect();
    let delays: Vec<f64> = accepted.iter().map(|c| c.raw_delay_ms).collect();

    let mut result = StabilityResult {
        source: source.to_string(),
        chunk_count: accepted.len(),
        ..Default::default()
    };

    if accepted.len() < settings.min_chunks.max(1) {
        result.reason = Some(format!(
            "Insufficient accepted chunks ({} < {})",
            accepted.len(),
            settings.min_chunks.max(1)
        ));
        return result;
    }

    result.mean_delay_ms = mean(&delays);
    result.min_delay_ms = delays.iter().copied().fold(f64::INFINITY, f64::min);
    result.max_delay_ms = delays.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    result.max_variance_ms = result.max_delay_ms - result.min_delay_ms;
    result.std_dev_ms = sample_std_dev(&delays);

    let mut outliers = Vec::new();
    match diagnosis.filter(|d| d.is_stepping()) {
        Some(diagnosis) => {
            result.is_stepping = true;
            result.cluster_count = diagnosis.cluster_details.len();

            for cluster in &diagnosis.cluster_details {
                let members: Vec<&ChunkResult> = accepted
                    .iter()
                    .copied()
                    .filter(|c| cluster.chunk_numbers.contains(&c.chunk_index))
                    .collect();
                let member_delays: Vec<f64> = members.iter().map(|c| c.raw_delay_ms).collect();

                let spread = spread(&member_delays);
                if exceeds(spread, settings.variance_threshold_ms) {
                    result.cluster_issues.push(ClusterIssue {
                        cluster_id: cluster.cluster_id,
                        chunk_count: members.len(),
                        max_variance_ms: spread,
                        std_dev_ms: sample_std_dev(&member_delays),
                    });
                }
                outliers.extend(find_outliers(&members, settings, Some(cluster.cluster_id)));
            }
            result.variance_detected = !result.cluster_issues.is_empty();
        }
        None => {
            result.cluster_count = diagnosis.map_or(0, |d| d.cluster_details.len());
            result.variance_detected = exceeds(result.max_variance_ms, settings.variance_threshold_ms);
            outliers = find_outliers(&accepted, settings, None);
        }
    }

    result.outlier_count = outliers.len();
    outliers.truncate(MAX_REPORTED_OUTLIERS);
    result.outliers = outliers;
    result
}

fn exceeds(spread: f64, threshold_ms: f64) -> bool {
    if threshold_ms <= 0.0 {
        spread > FLOAT_TOLERANCE_MS
    } else {
        spread > threshold_ms
    }
}

/// Outliers among `chunks` under the configured mode.
///
/// - `Any`: differs from the first chunk at all
/// - `Threshold`: farther than `outlier_threshold_ms` from the mean
/// - `Sigma`: farther than `outlier_sigma` standard deviations from the mean
pub fn find_outliers(
    chunks: &[&ChunkResult],
    settings: &StabilitySettings,
    cluster_id: Option<usize>,
) -> Vec<StabilityOutlier> {
    let Some(first) = chunks.first() else {
        return Vec::new();
    };
    let delays: Vec<f64> = chunks.iter().map(|c| c.raw_delay_ms).collect();
    let mean_delay = mean(&delays);
    let std_dev = sample_std_dev(&delays);

    let (reference, limit) = match settings.outlier_mode {
        OutlierMode::Any => (first.raw_delay_ms, FLOAT_TOLERANCE_MS),
        OutlierMode::Threshold => (mean_delay, settings.outlier_threshold_ms),
        OutlierMode::Sigma => {
            if std_dev <= FLOAT_TOLERANCE_MS {
                return Vec::new();
            }
            (mean_delay, settings.outlier_sigma * std_dev)
        }
    };

    chunks
        .iter()
        .filter_map(|c| {
            let deviation = c.raw_delay_ms - reference;
            (deviation.abs() > limit).then(|| StabilityOutlier {
                chunk_index: c.chunk_index,
                time_s: c.start_time_s,
                delay_ms: c.raw_delay_ms,
                deviation_ms: deviation,
                cluster_id,
            })
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn spread(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    max - min
}

/// Sample standard deviation (n - 1); 0 for fewer than two values.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::diagnosis::{diagnose, DiagnosisContext};
    use crate::config::EngineSettings;

    fn chunk(index: usize, delay: f64, confidence: f64) -> ChunkResult {
        ChunkResult::new(index, index as f64 * 60.0, delay, confidence, 50.0)
    }

    #[test]
    fn identical_delays_are_stable() {
        let chunks: Vec<_> = (1..=5).map(|i| chunk(i, -500.0, 95.0)).collect();
        let result = analyze_stability("Source 2", &chunks, None, &StabilitySettings::default());

        assert!(!result.variance_detected);
        assert_eq!(result.chunk_count, 5);
        assert_eq!(result.max_variance_ms, 0.0);
        assert_eq!(result.std_dev_ms, 0.0);
        assert_eq!(result.outlier_count, 0);
        assert_eq!(result.status(), "STABLE");
    }

    #[test]
    fn spread_and_sample_std_dev() {
        let delays = [-500.0, -510.0, -490.0, -520.0, -480.0];
        let chunks: Vec<_> = delays
            .iter()
            .enumerate()
            .map(|(i, d)| chunk(i + 1, *d, 95.0))
            .collect();
        let result = analyze_stability("Source 2", &chunks, None, &StabilitySettings::default());

        assert!(result.variance_detected);
        assert!((result.max_variance_ms - 40.0).abs() < 1e-9);
        assert!((result.mean_delay_ms + 500.0).abs() < 1e-9);
        // sqrt(1000 / 4)
        assert!((result.std_dev_ms - 250f64.sqrt()).abs() < 1e-9);
        assert_eq!(result.min_delay_ms, -520.0);
        assert_eq!(result.max_delay_ms, -480.0);
    }

    #[test]
    fn variance_threshold_tolerates_small_spread() {
        let chunks = vec![chunk(1, 100.0, 90.0), chunk(2, 100.4, 90.0), chunk(3, 99.8, 90.0)];
        let settings = StabilitySettings {
            variance_threshold_ms: 1.0,
            ..Default::default()
        };
        assert!(!analyze_stability("S", &chunks, None, &settings).variance_detected);
        assert!(analyze_stability("S", &chunks, None, &StabilitySettings::default()).variance_detected);
    }

    #[test]
    fn rejected_chunks_are_ignored() {
        let chunks = vec![
            chunk(1, 10.0, 95.0),
            chunk(2, 900.0, 5.0),
            chunk(3, 10.0, 95.0),
            chunk(4, 10.0, 95.0),
        ];
        let result = analyze_stability("S", &chunks, None, &StabilitySettings::default());
        assert_eq!(result.chunk_count, 3);
        assert!(!result.variance_detected);
    }

    #[test]
    fn too_few_chunks_are_skipped_with_reason() {
        let chunks = vec![chunk(1, 10.0, 95.0), chunk(2, 30.0, 95.0)];
        let result = analyze_stability("S", &chunks, None, &StabilitySettings::default());
        assert!(result.reason.is_some());
        assert!(!result.variance_detected);
        assert_eq!(result.status(), "SKIPPED");
    }

    #[test]
    fn outlier_modes() {
        let mut delays = vec![100.0; 11];
        delays[7] = 160.0;
        let chunks: Vec<_> = delays
            .iter()
            .enumerate()
            .map(|(i, d)| chunk(i + 1, *d, 95.0))
            .collect();
        let refs: Vec<&ChunkResult> = chunks.iter().collect();

        let sigma = find_outliers(&refs, &StabilitySettings::default(), None);
        assert_eq!(sigma.len(), 1);
        assert_eq!(sigma[0].chunk_index, 8);

        let any = StabilitySettings {
            outlier_mode: OutlierMode::Any,
            ..Default::default()
        };
        let found = find_outliers(&refs, &any, None);
        assert_eq!(found.len(), 1);
        assert!((found[0].deviation_ms - 60.0).abs() < 1e-9);

        // Mean is ~105.45, so every chunk deviates by more than 1 ms.
        let threshold = StabilitySettings {
            outlier_mode: OutlierMode::Threshold,
            ..Default::default()
        };
        assert_eq!(find_outliers(&refs, &threshold, None).len(), 11);
    }

    #[test]
    fn outliers_are_capped_but_counted() {
        let chunks: Vec<_> = (1..=15).map(|i| chunk(i, i as f64 * 3.0, 95.0)).collect();
        let settings = StabilitySettings {
            outlier_mode: OutlierMode::Any,
            ..Default::default()
        };
        let result = analyze_stability("S", &chunks, None, &settings);
        assert_eq!(result.outlier_count, 14);
        assert_eq!(result.outliers.len(), 10);
    }

    #[test]
    fn stepping_is_measured_per_cluster() {
        let mut chunks: Vec<_> = (1..=5).map(|i| chunk(i, 0.0, 95.0)).collect();
        chunks.extend((6..=10).map(|i| chunk(i, 1000.0 + (i % 2) as f64 * 4.0, 95.0)));

        let settings = EngineSettings::default();
        let context = DiagnosisContext {
            chunk_duration_s: 15.0,
            ..Default::default()
        };
        let diagnosis = diagnose(&chunks, &context, &settings);
        assert!(diagnosis.is_stepping());

        let result = analyze_stability("Source 2", &chunks, Some(&diagnosis), &settings.stability);
        assert!(result.is_stepping);
        assert_eq!(result.cluster_count, 2);
        assert_eq!(result.cluster_issues.len(), 1);
        assert_eq!(result.cluster_issues[0].cluster_id, 2);
        assert!((result.cluster_issues[0].max_variance_ms - 4.0).abs() < 1e-9);
        assert!(result.variance_detected);
    }
}
