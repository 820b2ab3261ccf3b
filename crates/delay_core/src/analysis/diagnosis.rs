//! Drift and stepping diagnosis.
//!
//! Classifies the pattern of accepted chunk delays:
//! - Uniform (one delay band, within a frame)
//! - PAL drift (25 fps material drifting ~40.9 ms/s)
//! - Linear drift (any other consistent slope)
//! - Stepping (two or more delay clusters from edits or reel changes)
//!
//! Accepted chunks are always grouped into clusters, and every cluster is
//! validated, so the valid and invalid cluster maps together cover every
//! accepted chunk exactly once. All functions are pure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{AnalysisError, AnalysisResult, ChunkResult};
use crate::config::{ClusterThresholds, EngineSettings};
use crate::models::{CorrectionMode, FallbackMode};

/// Classified delay pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosisType {
    #[default]
    Uniform,
    PalDrift,
    LinearDrift,
    Stepping,
}

impl std::fmt::Display for DiagnosisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosisType::Uniform => write!(f, "UNIFORM"),
            DiagnosisType::PalDrift => write!(f, "PAL_DRIFT"),
            DiagnosisType::LinearDrift => write!(f, "LINEAR_DRIFT"),
            DiagnosisType::Stepping => write!(f, "STEPPING"),
        }
    }
}

/// A group of accepted chunks sharing one delay band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// 1-based, numbered in order of first appearance.
    pub cluster_id: usize,
    pub mean_delay_ms: f64,
    pub std_delay_ms: f64,
    pub chunk_count: usize,
    /// Member `chunk_index` values in chronological order.
    pub chunk_numbers: Vec<usize>,
    /// Start times of the first and last member (seconds).
    pub time_range: (f64, f64),
    pub mean_match_pct: f64,
    pub min_match_pct: f64,
}

/// One named validation check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub passed: bool,
    pub value: f64,
    pub threshold: f64,
}

impl ValidationCheck {
    fn at_least(value: f64, threshold: f64) -> Self {
        Self {
            passed: value >= threshold,
            value,
            threshold,
        }
    }
}

/// Pass/fail record for one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterValidation {
    pub valid: bool,
    /// Checks keyed by name: `chunks`, `percentage`, `duration`,
    /// `match_quality`, `worst_match`.
    pub checks: BTreeMap<String, ValidationCheck>,
    pub passed_count: usize,
    pub total_checks: usize,
}

/// Diagnosis for one source and correlation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftDiagnosis {
    pub diagnosis_type: DiagnosisType,
    pub description: String,
    /// Fitted slope in ms per second (drift diagnoses).
    pub drift_rate_ms_s: Option<f64>,
    pub r_squared: Option<f64>,
    /// Frame rate the tolerances were derived from.
    pub framerate: Option<f64>,
    /// Number of density clusters (stepping only).
    pub cluster_count: Option<usize>,
    pub cluster_details: Vec<ClusterInfo>,
    /// cluster_id → member chunk indices.
    pub valid_clusters: BTreeMap<usize, Vec<usize>>,
    pub invalid_clusters: BTreeMap<usize, Vec<usize>>,
    pub validation_results: BTreeMap<usize, ClusterValidation>,
    pub correction_mode: CorrectionMode,
    pub fallback_mode: FallbackMode,
    /// Valid clusters needed before stepping can be corrected.
    pub min_total_clusters: usize,
}

impl DriftDiagnosis {
    fn new(diagnosis_type: DiagnosisType, description: String, settings: &EngineSettings) -> Self {
        Self {
            diagnosis_type,
            description,
            drift_rate_ms_s: None,
            r_squared: None,
            framerate: None,
            cluster_count: None,
            cluster_details: Vec::new(),
            valid_clusters: BTreeMap::new(),
            invalid_clusters: BTreeMap::new(),
            validation_results: BTreeMap::new(),
            correction_mode: settings.stepping.correction_mode,
            fallback_mode: settings.stepping.fallback_mode,
            min_total_clusters: settings.stepping.thresholds().min_total_clusters,
        }
    }

    pub fn is_stepping(&self) -> bool {
        self.diagnosis_type == DiagnosisType::Stepping
    }

    /// Whether stepping can be corrected with an EDL under the correction mode.
    pub fn is_correctable(&self) -> bool {
        if !self.is_stepping() {
            return false;
        }
        let enough = self.valid_clusters.len() >= self.min_total_clusters;
        match self.correction_mode {
            CorrectionMode::Full => self.invalid_clusters.is_empty() && enough,
            CorrectionMode::Filtered => enough,
            CorrectionMode::Disabled => false,
        }
    }

    /// Details of the clusters that passed validation, chronologically.
    pub fn valid_cluster_details(&self) -> Vec<&ClusterInfo> {
        self.cluster_details
            .iter()
            .filter(|c| self.valid_clusters.contains_key(&c.cluster_id))
            .collect()
    }
}

/// Per-source facts the diagnoser needs beyond the chunk list.
#[derive(Debug, Clone, Default)]
pub struct DiagnosisContext {
    /// Video frame rate of the source, when it has video.
    pub framerate: Option<f64>,
    /// Codec id of the analyzed audio track (`A_FLAC`, `A_AAC`, ...).
    pub codec_id: Option<String>,
    /// Chunk window length (seconds), added to a cluster's span.
    pub chunk_duration_s: f64,
}

/// PCM, FLAC, TrueHD and MLP are treated as lossless.
pub fn is_lossless_codec(codec_id: Option<&str>) -> bool {
    codec_id
        .map(|codec| {
            let codec = codec.to_lowercase();
            ["pcm", "flac", "truehd", "mlp"]
                .iter()
                .any(|needle| codec.contains(needle))
        })
        .unwrap_or(false)
}

/// Diagnose the delay pattern of one source.
///
/// Order of checks:
/// 1. Too few accepted chunks → Uniform
/// 2. Spread within the frame tolerance → Uniform
/// 3. PAL drift (frame rate ≈25 and slope ≈40.9 ms/s)
/// 4. Stepping (≥2 density clusters, correction not disabled)
/// 5. Linear drift (slope and R² above the codec thresholds)
/// 6. Uniform
pub fn diagnose(
    chunks: &[ChunkResult],
    context: &DiagnosisContext,
    settings: &EngineSettings,
) -> DriftDiagnosis {
    let drift = &settings.drift;
    let stepping = &settings.stepping;
    let accepted: Vec<&ChunkResult> = chunks.iter().filter(|c| c.accepted).collect();
    let fps = context
        .framerate
        .filter(|f| *f > 0.0)
        .unwrap_or(drift.default_framerate);

    let labels = dbscan_1d(
        &accepted.iter().map(|c| c.raw_delay_ms).collect::<Vec<_>>(),
        stepping.dbscan_epsilon_ms,
        stepping.dbscan_min_samples,
    );
    let density_clusters = labels.iter().flatten().max().map_or(0, |m| m + 1);
    let clusters = build_clusters(&accepted, &labels);

    let mut diagnosis = classify(&accepted, fps, density_clusters, context, settings);
    diagnosis.framerate = Some(fps);

    let thresholds = stepping.thresholds();
    for cluster in &clusters {
        let validation = validate_cluster(cluster, accepted.len(), context.chunk_duration_s, &thresholds);
        if validation.valid {
            diagnosis
                .valid_clusters
                .insert(cluster.cluster_id, cluster.chunk_numbers.clone());
        } else {
            diagnosis
                .invalid_clusters
                .insert(cluster.cluster_id, cluster.chunk_numbers.clone());
        }
        diagnosis.validation_results.insert(cluster.cluster_id, validation);
    }
    diagnosis.cluster_details = clusters;
    diagnosis
}

fn classify(
    accepted: &[&ChunkResult],
    fps: f64,
    density_clusters: usize,
    context: &DiagnosisContext,
    settings: &EngineSettings,
) -> DriftDiagnosis {
    let drift = &settings.drift;

    if accepted.len() < drift.min_accepted_chunks {
        return DriftDiagnosis::new(
            DiagnosisType::Uniform,
            format!(
                "Insufficient chunks for drift analysis ({} accepted, need {})",
                accepted.len(),
                drift.min_accepted_chunks
            ),
            settings,
        );
    }

    let times: Vec<f64> = accepted.iter().map(|c| c.start_time_s).collect();
    let delays: Vec<f64> = accepted.iter().map(|c| c.raw_delay_ms).collect();

    let min = delays.iter().copied().fold(f64::INFINITY, f64::min);
    let max = delays.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let tolerance_ms = drift.uniform_tolerance_frames * 1000.0 / fps;
    if max - min <= tolerance_ms {
        return DriftDiagnosis::new(
            DiagnosisType::Uniform,
            format!(
                "Delays consistent: spread {:.1} ms within {:.1} ms tolerance",
                max - min,
                tolerance_ms
            ),
            settings,
        );
    }

    let (slope, _, r_squared) = linear_regression(&times, &delays);

    let is_pal_rate = (fps - drift.pal_framerate).abs() <= drift.pal_framerate_tolerance;
    if is_pal_rate && (slope - drift.pal_drift_rate).abs() <= drift.pal_drift_tolerance {
        let mut diagnosis = DriftDiagnosis::new(
            DiagnosisType::PalDrift,
            format!(
                "PAL drift detected: {:.2} ms/s (framerate {:.3} fps)",
                slope, fps
            ),
            settings,
        );
        diagnosis.drift_rate_ms_s = Some(slope);
        diagnosis.r_squared = Some(r_squared);
        return diagnosis;
    }

    if density_clusters >= 2 && settings.stepping.correction_mode != CorrectionMode::Disabled {
        let mut diagnosis = DriftDiagnosis::new(
            DiagnosisType::Stepping,
            format!(
                "Stepping detected: {} distinct delay clusters",
                density_clusters
            ),
            settings,
        );
        diagnosis.cluster_count = Some(density_clusters);
        return diagnosis;
    }

    let lossless = is_lossless_codec(context.codec_id.as_deref());
    let (slope_threshold, r2_threshold) = if lossless {
        (drift.slope_threshold_lossless, drift.r2_threshold_lossless)
    } else {
        (drift.slope_threshold_lossy, drift.r2_threshold_lossy)
    };
    if slope.abs() > slope_threshold && r_squared > r2_threshold {
        let mut diagnosis = DriftDiagnosis::new(
            DiagnosisType::LinearDrift,
            format!(
                "Linear drift detected: {:.2} ms/s (R²={:.3})",
                slope, r_squared
            ),
            settings,
        );
        diagnosis.drift_rate_ms_s = Some(slope);
        diagnosis.r_squared = Some(r_squared);
        return diagnosis;
    }

    DriftDiagnosis::new(
        DiagnosisType::Uniform,
        format!(
            "No consistent drift: spread {:.1} ms, slope {:.2} ms/s (R²={:.3})",
            max - min,
            slope,
            r_squared
        ),
        settings,
    )
}

/// Group chunks by label; noise points become singleton clusters.
///
/// Cluster ids are assigned in order of each cluster's first chunk.
fn build_clusters(accepted: &[&ChunkResult], labels: &[Option<usize>]) -> Vec<ClusterInfo> {
    let mut groups: Vec<Vec<&ChunkResult>> = Vec::new();
    let mut group_of_label: BTreeMap<usize, usize> = BTreeMap::new();

    for (chunk, label) in accepted.iter().zip(labels) {
        match label {
            Some(label) => match group_of_label.get(label) {
                Some(&group) => groups[group].push(chunk),
                None => {
                    group_of_label.insert(*label, groups.len());
                    groups.push(vec![chunk]);
                }
            },
            None => groups.push(vec![chunk]),
        }
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(i, members)| cluster_info(i + 1, &members))
        .collect()
}

fn cluster_info(cluster_id: usize, members: &[&ChunkResult]) -> ClusterInfo {
    let n = members.len().max(1) as f64;
    let mean = members.iter().map(|c| c.raw_delay_ms).sum::<f64>() / n;
    let std = (members
        .iter()
        .map(|c| (c.raw_delay_ms - mean).powi(2))
        .sum::<f64>()
        / n)
        .sqrt();
    let first = members.first().map_or(0.0, |c| c.start_time_s);
    let last = members.last().map_or(0.0, |c| c.start_time_s);

    ClusterInfo {
        cluster_id,
        mean_delay_ms: mean,
        std_delay_ms: std,
        chunk_count: members.len(),
        chunk_numbers: members.iter().map(|c| c.chunk_index).collect(),
        time_range: (first, last),
        mean_match_pct: members.iter().map(|c| c.confidence).sum::<f64>() / n,
        min_match_pct: members
            .iter()
            .map(|c| c.confidence)
            .fold(f64::INFINITY, f64::min)
            .min(100.0),
    }
}

/// Check a cluster against the configured thresholds.
pub fn validate_cluster(
    cluster: &ClusterInfo,
    total_accepted: usize,
    chunk_duration_s: f64,
    thresholds: &ClusterThresholds,
) -> ClusterValidation {
    let percentage = cluster.chunk_count as f64 * 100.0 / total_accepted.max(1) as f64;
    let duration = (cluster.time_range.1 - cluster.time_range.0) + chunk_duration_s;

    let mut checks = BTreeMap::new();
    checks.insert(
        "chunks".to_string(),
        ValidationCheck::at_least(
            cluster.chunk_count as f64,
            thresholds.min_chunks_per_cluster as f64,
        ),
    );
    checks.insert(
        "percentage".to_string(),
        ValidationCheck::at_least(percentage, thresholds.min_cluster_percentage),
    );
    checks.insert(
        "duration".to_string(),
        ValidationCheck::at_least(duration, thresholds.min_cluster_duration_s),
    );
    checks.insert(
        "match_quality".to_string(),
        ValidationCheck::at_least(cluster.mean_match_pct, thresholds.min_match_quality_pct),
    );
    checks.insert(
        "worst_match".to_string(),
        ValidationCheck::at_least(cluster.min_match_pct, thresholds.min_worst_match_pct),
    );

    let passed_count = checks.values().filter(|c| c.passed).count();
    ClusterValidation {
        valid: passed_count == checks.len(),
        total_checks: checks.len(),
        passed_count,
        checks,
    }
}

/// Handle valid stepping clusters that cannot be corrected with an EDL.
///
/// Returns `Ok(None)` when fewer than two valid clusters exist or they agree
/// within the clustering radius. Otherwise `Abort` fails with
/// `ClusterDisagreement` and any other fallback returns the most robust
/// cluster (most chunks, then best mean match).
pub fn resolve_cluster_disagreement<'a>(
    diagnosis: &'a DriftDiagnosis,
    epsilon_ms: f64,
) -> AnalysisResult<Option<&'a ClusterInfo>> {
    let valid = diagnosis.valid_cluster_details();
    if valid.len() < 2 {
        return Ok(None);
    }

    let min = valid.iter().map(|c| c.mean_delay_ms).fold(f64::INFINITY, f64::min);
    let max = valid
        .iter()
        .map(|c| c.mean_delay_ms)
        .fold(f64::NEG_INFINITY, f64::max);
    if max - min <= epsilon_ms {
        return Ok(None);
    }

    if diagnosis.fallback_mode == FallbackMode::Abort {
        return Err(AnalysisError::ClusterDisagreement {
            delays: valid.iter().map(|c| c.mean_delay_ms.round() as i64).collect(),
        });
    }

    Ok(valid.into_iter().max_by(|a, b| {
        a.chunk_count
            .cmp(&b.chunk_count)
            .then(a.mean_match_pct.total_cmp(&b.mean_match_pct))
            // Earlier cluster wins a full tie.
            .then(b.cluster_id.cmp(&a.cluster_id))
    }))
}

/// Simple linear regression: y = slope * x + intercept
///
/// Returns (slope, intercept, r_squared).
pub fn linear_regression(x: &[f64], y: &[f64]) -> (f64, f64, f64) {
    if x.len() < 2 || x.len() != y.len() {
        return (0.0, 0.0, 0.0);
    }

    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;

    let (numerator, denominator) = x.iter().zip(y).fold((0.0, 0.0), |(num, den), (xi, yi)| {
        let dx = xi - x_mean;
        (num + dx * (yi - y_mean), den + dx * dx)
    });
    if denominator.abs() < 1e-10 {
        return (0.0, y_mean, 0.0);
    }

    let slope = numerator / denominator;
    let intercept = y_mean - slope * x_mean;

    let (ss_res, ss_tot) = x.iter().zip(y).fold((0.0, 0.0), |(res, tot), (xi, yi)| {
        let predicted = slope * xi + intercept;
        (res + (yi - predicted).powi(2), tot + (yi - y_mean).powi(2))
    });
    let r_squared = if ss_tot.abs() < 1e-10 {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    };

    (slope, intercept, r_squared.max(0.0))
}

/// DBSCAN over scalar values. `None` marks noise.
pub fn dbscan_1d(values: &[f64], epsilon: f64, min_samples: usize) -> Vec<Option<usize>> {
    let n = values.len();
    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_cluster = 0;

    let neighbors = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| (values[i] - values[j]).abs() <= epsilon)
            .collect()
    };

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let seeds = neighbors(i);
        if seeds.len() < min_samples {
            continue;
        }

        let cluster = next_cluster;
        next_cluster += 1;
        labels[i] = Some(cluster);

        let mut queue = seeds;
        let mut head = 0;
        while head < queue.len() {
            let j = queue[head];
            head += 1;

            if labels[j].is_none() {
                labels[j] = Some(cluster);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;

            let expansion = neighbors(j);
            if expansion.len() >= min_samples {
                queue.extend(expansion.into_iter().filter(|&k| labels[k].is_none()));
            }
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn chunk(index: usize, start: f64, delay: f64, confidence: f64) -> ChunkResult {
        ChunkResult::new(index, start, delay, confidence, 50.0)
    }

    fn context() -> DiagnosisContext {
        DiagnosisContext {
            framerate: None,
            codec_id: None,
            chunk_duration_s: 15.0,
        }
    }

    fn accepted_indices(chunks: &[ChunkResult]) -> BTreeSet<usize> {
        chunks.iter().filter(|c| c.accepted).map(|c| c.chunk_index).collect()
    }

    fn assert_complete(diagnosis: &DriftDiagnosis, chunks: &[ChunkResult]) {
        let mut seen = BTreeSet::new();
        for members in diagnosis
            .valid_clusters
            .values()
            .chain(diagnosis.invalid_clusters.values())
        {
            for &m in members {
                assert!(seen.insert(m), "chunk {} in two clusters", m);
            }
        }
        assert_eq!(seen, accepted_indices(chunks));
    }

    #[test]
    fn uniform_delays_are_uniform() {
        let chunks: Vec<_> = (0..10)
            .map(|i| chunk(i + 1, i as f64 * 60.0, -500.0 + (i % 3) as f64 * 2.0, 95.0))
            .collect();
        let diagnosis = diagnose(&chunks, &context(), &EngineSettings::default());

        assert_eq!(diagnosis.diagnosis_type, DiagnosisType::Uniform);
        assert_eq!(diagnosis.cluster_details.len(), 1);
        assert_complete(&diagnosis, &chunks);
    }

    #[test]
    fn low_confidence_outliers_are_excluded_before_clustering() {
        let mut chunks: Vec<_> = (0..8)
            .map(|i| chunk(i + 1, i as f64 * 60.0, 500.0, 70.0))
            .collect();
        chunks.push(chunk(9, 480.0, 50.0, 5.0));
        chunks.push(chunk(10, 540.0, 50.0, 8.0));

        let diagnosis = diagnose(&chunks, &context(), &EngineSettings::default());
        assert_eq!(diagnosis.diagnosis_type, DiagnosisType::Uniform);
        assert_complete(&diagnosis, &chunks);
    }

    #[test]
    fn pal_drift_requires_pal_framerate() {
        let chunks: Vec<_> = (0..10)
            .map(|i| {
                let t = i as f64 * 10.0;
                chunk(i + 1, t, t * 40.9, 95.0)
            })
            .collect();

        let pal = DiagnosisContext {
            framerate: Some(25.0),
            ..context()
        };
        let diagnosis = diagnose(&chunks, &pal, &EngineSettings::default());
        assert_eq!(diagnosis.diagnosis_type, DiagnosisType::PalDrift);
        assert!((diagnosis.drift_rate_ms_s.unwrap() - 40.9).abs() < 1e-6);

        let film = DiagnosisContext {
            framerate: Some(23.976),
            ..context()
        };
        let diagnosis = diagnose(&chunks, &film, &EngineSettings::default());
        assert_eq!(diagnosis.diagnosis_type, DiagnosisType::LinearDrift);
    }

    #[test]
    fn linear_drift_detected() {
        let chunks: Vec<_> = (0..10)
            .map(|i| {
                let t = i as f64 * 60.0;
                chunk(i + 1, t, 100.0 + t * 2.0, 90.0)
            })
            .collect();
        let diagnosis = diagnose(&chunks, &context(), &EngineSettings::default());

        assert_eq!(diagnosis.diagnosis_type, DiagnosisType::LinearDrift);
        assert!(diagnosis.r_squared.unwrap() > 0.99);
        assert_complete(&diagnosis, &chunks);
    }

    #[test]
    fn lossless_codec_lowers_slope_threshold() {
        // 0.3 ms/s: below the lossy threshold, above the lossless one.
        let chunks: Vec<_> = (0..10)
            .map(|i| {
                let t = i as f64 * 100.0;
                chunk(i + 1, t, t * 0.3, 95.0)
            })
            .collect();

        let lossy = diagnose(&chunks, &context(), &EngineSettings::default());
        let flac = DiagnosisContext {
            codec_id: Some("A_FLAC".to_string()),
            ..context()
        };
        let lossless = diagnose(&chunks, &flac, &EngineSettings::default());

        assert_eq!(lossy.diagnosis_type, DiagnosisType::Uniform);
        assert_eq!(lossless.diagnosis_type, DiagnosisType::LinearDrift);
    }

    #[test]
    fn stepping_builds_validated_clusters() {
        let mut chunks = Vec::new();
        for i in 0..5 {
            chunks.push(chunk(i + 1, i as f64 * 60.0, -500.0, 95.0));
        }
        for i in 5..10 {
            chunks.push(chunk(i + 1, i as f64 * 60.0, -1500.0, 95.0));
        }

        let diagnosis = diagnose(&chunks, &context(), &EngineSettings::default());
        assert_eq!(diagnosis.diagnosis_type, DiagnosisType::Stepping);
        assert_eq!(diagnosis.cluster_count, Some(2));
        assert_eq!(diagnosis.valid_clusters.len(), 2);
        assert_eq!(diagnosis.valid_clusters[&1], vec![1, 2, 3, 4, 5]);
        assert_eq!(diagnosis.valid_clusters[&2], vec![6, 7, 8, 9, 10]);
        assert!(diagnosis.is_correctable());
        assert_complete(&diagnosis, &chunks);
    }

    #[test]
    fn noise_chunk_becomes_invalid_singleton() {
        let mut chunks = Vec::new();
        for i in 0..5 {
            chunks.push(chunk(i + 1, i as f64 * 60.0, 0.0, 95.0));
        }
        chunks.push(chunk(6, 300.0, 777.0, 95.0));
        for i in 6..11 {
            chunks.push(chunk(i + 1, i as f64 * 60.0, 1000.0, 95.0));
        }

        let diagnosis = diagnose(&chunks, &context(), &EngineSettings::default());
        assert_eq!(diagnosis.diagnosis_type, DiagnosisType::Stepping);
        assert_eq!(diagnosis.invalid_clusters.values().next(), Some(&vec![6]));
        assert!(!diagnosis.validation_results[&2].checks["chunks"].passed);
        assert_complete(&diagnosis, &chunks);

        // Full mode refuses while an invalid cluster remains; filtered accepts.
        assert!(!diagnosis.is_correctable());
        let mut settings = EngineSettings::default();
        settings.stepping.correction_mode = CorrectionMode::Filtered;
        assert!(diagnose(&chunks, &context(), &settings).is_correctable());
    }

    #[test]
    fn disabled_correction_never_reports_stepping() {
        let chunks: Vec<_> = (0..10)
            .map(|i| chunk(i + 1, i as f64 * 60.0, if i < 5 { 0.0 } else { 1000.0 }, 95.0))
            .collect();
        let mut settings = EngineSettings::default();
        settings.stepping.correction_mode = CorrectionMode::Disabled;

        let diagnosis = diagnose(&chunks, &context(), &settings);
        assert_ne!(diagnosis.diagnosis_type, DiagnosisType::Stepping);
        assert!(!diagnosis.is_correctable());
    }

    #[test]
    fn insufficient_chunks_return_uniform() {
        let chunks: Vec<_> = (0..3)
            .map(|i| chunk(i + 1, i as f64 * 10.0, i as f64 * 300.0, 95.0))
            .collect();
        let diagnosis = diagnose(&chunks, &context(), &EngineSettings::default());

        assert_eq!(diagnosis.diagnosis_type, DiagnosisType::Uniform);
        assert!(diagnosis.description.contains("Insufficient"));
        assert_complete(&diagnosis, &chunks);
    }

    #[test]
    fn validation_reports_each_check() {
        let cluster = ClusterInfo {
            cluster_id: 1,
            mean_delay_ms: 10.0,
            std_delay_ms: 0.0,
            chunk_count: 3,
            chunk_numbers: vec![1, 2, 3],
            time_range: (0.0, 10.0),
            mean_match_pct: 80.0,
            min_match_pct: 70.0,
        };
        let validation = validate_cluster(&cluster, 10, 15.0, &ClusterThresholds::normal());

        assert!(validation.checks["chunks"].passed);
        assert!(validation.checks["percentage"].passed);
        assert!(validation.checks["duration"].passed);
        assert_eq!(validation.checks["duration"].value, 25.0);
        assert!(!validation.checks["match_quality"].passed);
        assert!(validation.checks["worst_match"].passed);
        assert!(!validation.valid);
        assert_eq!(validation.passed_count, 4);
        assert_eq!(validation.total_checks, 5);
    }

    fn disagreeing_diagnosis(fallback: FallbackMode) -> DriftDiagnosis {
        let mut settings = EngineSettings::default();
        settings.stepping.fallback_mode = fallback;
        let mut chunks = Vec::new();
        for i in 0..4 {
            chunks.push(chunk(i + 1, i as f64 * 60.0, 200.0, 90.0));
        }
        for i in 4..10 {
            chunks.push(chunk(i + 1, i as f64 * 60.0, 900.0, 90.0));
        }
        diagnose(&chunks, &context(), &settings)
    }

    #[test]
    fn disagreement_abort_fails() {
        let diagnosis = disagreeing_diagnosis(FallbackMode::Abort);
        let err = resolve_cluster_disagreement(&diagnosis, 20.0).unwrap_err();
        assert!(matches!(err, AnalysisError::ClusterDisagreement { delays } if delays == vec![200, 900]));
    }

    #[test]
    fn disagreement_nearest_picks_largest_cluster() {
        let diagnosis = disagreeing_diagnosis(FallbackMode::Nearest);
        let chosen = resolve_cluster_disagreement(&diagnosis, 20.0).unwrap().unwrap();
        assert_eq!(chosen.cluster_id, 2);
        assert_eq!(chosen.chunk_count, 6);
    }

    #[test]
    fn linear_regression_calculates_correctly() {
        let x = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let y = vec![10.0, 12.0, 14.0, 16.0, 18.0];
        let (slope, intercept, r_squared) = linear_regression(&x, &y);

        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - 10.0).abs() < 1e-9);
        assert!((r_squared - 1.0).abs() < 1e-9);
    }

    #[test]
    fn dbscan_separates_bands_and_marks_noise() {
        let labels = dbscan_1d(&[0.0, 1.0, 2.0, 100.0, 101.0, 102.0, 1000.0], 10.0, 2);
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[3], labels[5]);
        assert_ne!(labels[0], labels[3]);
        assert!(labels[0].is_some() && labels[3].is_some());
        assert_eq!(labels[6], None);
    }

    #[test]
    fn codec_detection_works() {
        assert!(is_lossless_codec(Some("A_FLAC")));
        assert!(is_lossless_codec(Some("A_TRUEHD")));
        assert!(is_lossless_codec(Some("A_PCM/INT/LIT")));
        assert!(!is_lossless_codec(Some("A_AAC")));
        assert!(!is_lossless_codec(None));
    }
}
