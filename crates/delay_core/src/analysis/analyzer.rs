//! Job-level analysis.
//!
//! `Source 1` is the reference and sits at 0 ms by definition. Every other
//! source is decoded, correlated against it, diagnosed and reduced to one
//! delay; the reference's container delay is folded in and finally the
//! whole job is shifted so no audio delay is negative.
//!
//! A failure that belongs to one source (decode, track resolution, too few
//! chunks, no accepted chunks) is logged and recorded, and the remaining
//! sources are still analyzed. Cancellation and an aborted cluster
//! disagreement stop the job.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::container::{
    calculate_delay_chain, find_correlation_track_delay, ContainerDelays, FinalDelay,
};
use super::delay_selection::select_delay;
use super::diagnosis::{diagnose, resolve_cluster_disagreement, DiagnosisContext, DriftDiagnosis};
use super::edl::build_edl;
use super::global_shift::{calculate_global_shift, Delays, GlobalShiftCalculation};
use super::runner::{AudioSource, CorrelationRunner};
use super::stability::analyze_stability;
use super::types::{
    AnalysisError, AnalysisResult, AudioData, CancellationToken, ChunkResult, CorrelationResult,
    DelayResult,
};
use crate::config::EngineSettings;
use crate::logging::JobLogger;
use crate::models::{CorrelationMethod, SyncMode};

/// Key of the reference source.
pub const REFERENCE_SOURCE: &str = "Source 1";

/// Sources of one job.
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    /// Source key (`Source 1`, `Source 2`, ...) to file.
    pub sources: BTreeMap<String, AudioSource>,
    /// Sources whose audio ends up in the output; `None` means all of them.
    pub audio_sources: Option<BTreeSet<String>>,
}

impl JobSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, key: impl Into<String>, source: AudioSource) -> Self {
        self.sources.insert(key.into(), source);
        self
    }
}

/// Measurements for one analyzed source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceAnalysis {
    /// Result of the configured algorithm.
    pub result: CorrelationResult,
    /// Results of the other algorithms in multi-correlation mode.
    pub comparisons: Vec<CorrelationResult>,
    pub delay: DelayResult,
}

/// Everything the analysis of a job produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobAnalysis {
    pub results: BTreeMap<String, CorrelationResult>,
    pub comparisons: BTreeMap<String, Vec<CorrelationResult>>,
    /// Selector output per source, before container delay and shift.
    pub delays: BTreeMap<String, DelayResult>,
    /// Selector output plus the reference container delay.
    pub final_delays: BTreeMap<String, FinalDelay>,
    /// Delays after the global shift, reference included.
    pub job_delays: Delays,
    pub global_shift: GlobalShiftCalculation,
    pub container_delays: ContainerDelays,
    /// Sources that produced no delay, with the reason.
    pub failures: BTreeMap<String, String>,
}

impl JobAnalysis {
    /// Delay to apply to a source in the output, shift included.
    pub fn output_delay_ms(&self, source: &str) -> Option<i64> {
        self.job_delays.source_delays_ms.get(source).copied()
    }
}

/// Analyze every source of a job against `Source 1`.
pub fn analyze_job(
    spec: &JobSpec,
    settings: &EngineSettings,
    logger: &JobLogger,
    cancel: &CancellationToken,
) -> AnalysisResult<JobAnalysis> {
    logger.section("Audio Sync Analysis");

    let reference_source = spec
        .sources
        .get(REFERENCE_SOURCE)
        .ok_or_else(|| AnalysisError::SourceNotFound(REFERENCE_SOURCE.to_string()))?;

    let mut job = JobAnalysis::default();
    job.job_delays.set_delay(REFERENCE_SOURCE, 0, 0.0);

    if spec.sources.len() == 1 {
        logger.info("Remux-only mode - no sync sources to analyze");
        return Ok(job);
    }

    logger.info(&format!(
        "Sync Mode: {}",
        match settings.selection.sync_mode {
            SyncMode::PositiveOnly => "Positive Only (will shift to eliminate negatives)",
            SyncMode::AllowNegative => "Allow Negative (no global shift)",
        }
    ));

    let runner = CorrelationRunner::new(settings, logger, cancel.clone());

    let chunks = &settings.chunks;
    logger.info(&format!(
        "Chunks: {} x {}s, Range: {:.0}%-{:.0}%",
        chunks.scan_chunk_count,
        chunks.scan_chunk_duration,
        chunks.scan_start_percentage,
        chunks.scan_end_percentage
    ));

    let reference = runner.decode_source(REFERENCE_SOURCE, reference_source)?;

    logger.info("--- Getting Source 1 Container Delays for Analysis ---");
    let mut container = ContainerDelays::from_media(&reference.media);
    container.log_nonzero(REFERENCE_SOURCE, logger);
    let first_track_delay = reference
        .media
        .audio_tracks()
        .first()
        .map(|t| container.audio_delay(t.id))
        .unwrap_or(0.0);
    container.selected_audio_delay_ms = find_correlation_track_delay(
        &container,
        &reference.media,
        reference_source.track_index,
        reference_source.language.as_deref(),
        first_track_delay,
        logger,
    );
    if container.selected_audio_delay_ms == 0.0 {
        logger.info(
            "[Container Delay] Source 1 audio has no container delay relative to video (0ms)",
        );
    }
    let reference_framerate = reference.media.video_framerate();

    logger.info("--- Running Audio Correlation Analysis ---");
    let targets: Vec<(&String, &AudioSource)> = spec
        .sources
        .iter()
        .filter(|(k, _)| k.as_str() != REFERENCE_SOURCE)
        .collect();
    for (done, (key, source)) in targets.iter().copied().enumerate() {
        cancel.check()?;
        logger.progress((done * 100 / targets.len()) as u32);
        logger.clear_tail();
        logger.info(&format!(
            "Analyzing {}: {}",
            key,
            source
                .path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
        ));

        let analyzed = runner.decode_source(key, source).and_then(|target| {
            let context = DiagnosisContext {
                framerate: target.media.video_framerate().or(reference_framerate),
                codec_id: target.track.codec.clone(),
                chunk_duration_s: settings.chunks.scan_chunk_duration,
            };
            analyze_pair(&runner, key, &reference.audio, &target.audio, &context)
        });

        let analysis = match analyzed {
            Ok(analysis) => analysis,
            Err(e @ (AnalysisError::Cancelled | AnalysisError::ClusterDisagreement { .. })) => {
                return Err(e);
            }
            Err(e) => {
                logger.error(&format!("{}: {}", key, e));
                logger.show_tail(&format!("{} analysis failed", key));
                job.failures.insert(key.clone(), e.to_string());
                continue;
            }
        };

        let chain = calculate_delay_chain(
            &analysis.delay,
            container.selected_audio_delay_ms,
            key,
            logger,
        );
        job.job_delays.set_delay(key.as_str(), chain.rounded_ms, chain.raw_ms);
        job.final_delays.insert(key.clone(), chain);
        job.delays.insert(key.clone(), analysis.delay);
        if !analysis.comparisons.is_empty() {
            job.comparisons.insert(key.clone(), analysis.comparisons);
        }
        job.results.insert(key.clone(), analysis.result);
    }

    let shift = calculate_global_shift(
        &job.job_delays,
        spec.audio_sources.as_ref(),
        Some(&container),
        settings.selection.sync_mode,
        logger,
    );
    job.job_delays.apply_global_shift(&shift, logger);
    job.global_shift = shift;
    job.container_delays = container;

    logger.progress(100);
    log_stability_summary(logger, &job.results);
    if job.failures.is_empty() {
        logger.success("Analysis complete");
    } else {
        logger.warn(&format!(
            "Analysis complete, {} source(s) without a delay",
            job.failures.len()
        ));
    }
    Ok(job)
}

/// Correlate an already decoded pair and reduce it to one delay.
///
/// In multi-correlation mode every enabled algorithm is run and evaluated;
/// the configured algorithm (or the first one, when it is not enabled)
/// decides the delay and the rest are kept for comparison.
pub fn analyze_pair(
    runner: &CorrelationRunner<'_>,
    source_key: &str,
    reference: &AudioData,
    target: &AudioData,
    context: &DiagnosisContext,
) -> AnalysisResult<SourceAnalysis> {
    let settings = runner.settings();
    let logger = runner.logger();
    let timeline_s = Some(reference.duration_secs());

    if !settings.multi_correlation.enabled {
        let mut result = runner.run(source_key, reference, target)?;
        let delay = evaluate_result(&mut result, context, settings, logger, timeline_s)?;
        return Ok(SourceAnalysis {
            result,
            comparisons: Vec::new(),
            delay,
        });
    }

    let bar = "═".repeat(70);
    logger.info(&format!(
        "\n{}\n  MULTI-CORRELATION ANALYSIS: {}\n{}",
        bar, source_key, bar
    ));

    let mut results = runner.run_multi(source_key, reference, target)?;
    let mut outcomes: Vec<AnalysisResult<DelayResult>> = results
        .iter_mut()
        .map(|result| evaluate_result(result, context, settings, logger, timeline_s))
        .collect();

    logger.info("--- Multi-Correlation Summary ---");
    for (result, outcome) in results.iter().zip(&outcomes) {
        let verdict = match outcome {
            Ok(delay) => format!("{:+} ms", delay.rounded_ms),
            Err(e) => format!("no result ({})", e),
        };
        logger.info(&format!(
            "  {}: {} [{}/{} accepted, {}]",
            result.correlation_method,
            verdict,
            result.accepted_count,
            result.total_count,
            result
                .diagnosis
                .as_ref()
                .map(|d| d.diagnosis_type.to_string())
                .unwrap_or_else(|| "-".to_string())
        ));
    }

    let configured = CorrelationMethod::from_name(&settings.correlation.correlation_method);
    let primary = configured
        .and_then(|m| results.iter().position(|r| r.correlation_method == m.name()))
        .unwrap_or(0);

    let result = results.remove(primary);
    let delay = outcomes.remove(primary)?;
    Ok(SourceAnalysis {
        result,
        comparisons: results,
        delay,
    })
}

/// Diagnose, measure stability and select the delay of one result.
///
/// Diagnosis and stability are stored on `result` even when selection
/// fails. Stepping that cannot be corrected with an EDL goes through the
/// cluster disagreement policy before the regular selector.
pub fn evaluate_result(
    result: &mut CorrelationResult,
    context: &DiagnosisContext,
    settings: &EngineSettings,
    logger: &JobLogger,
    timeline_s: Option<f64>,
) -> AnalysisResult<DelayResult> {
    let source_key = result.source_key.clone();
    let diagnosis = diagnose(&result.chunks, context, settings);
    logger.info(&format!(
        "[{}] Diagnosis: {} - {}",
        source_key, diagnosis.diagnosis_type, diagnosis.description
    ));

    if settings.stability.enabled {
        result.stability = Some(analyze_stability(
            &source_key,
            &result.chunks,
            Some(&diagnosis),
            &settings.stability,
        ));
    }

    let selected = choose_delay(&result.chunks, &diagnosis, settings, logger, &source_key);

    if diagnosis.is_correctable() {
        result.edl = build_edl(
            &diagnosis,
            &result.chunks,
            context.chunk_duration_s,
            timeline_s,
        );
        logger.info(&format!(
            "[{}] Stepping correction: {} segment(s)",
            source_key,
            result.edl.len()
        ));
        for segment in &result.edl {
            logger.info(&format!(
                "  {:>8.2}s - {:>8.2}s: {:+} ms (cluster {})",
                segment.start_s, segment.end_s, segment.delay_ms, segment.cluster_id
            ));
        }
    }
    result.diagnosis = Some(diagnosis);

    let delay = selected?;
    logger.info(&format!(
        "[{}] Selected delay: {:+} ms (raw {:+.3} ms) via {}{}",
        source_key,
        delay.rounded_ms,
        delay.raw_ms,
        delay.method,
        if delay.fallback_used { " [fallback]" } else { "" }
    ));
    result.final_delay = Some(delay.clone());
    Ok(delay)
}

fn choose_delay(
    chunks: &[ChunkResult],
    diagnosis: &DriftDiagnosis,
    settings: &EngineSettings,
    logger: &JobLogger,
    source_key: &str,
) -> AnalysisResult<DelayResult> {
    if diagnosis.is_stepping() && !diagnosis.is_correctable() {
        let valid_count = diagnosis.valid_clusters.len();
        if let Some(cluster) =
            resolve_cluster_disagreement(diagnosis, settings.stepping.dbscan_epsilon_ms)?
        {
            logger.warn(&format!(
                "[{}] {} valid clusters disagree and cannot be corrected; using cluster {} \
                 ({:+.1} ms, {} chunks) unverified",
                source_key,
                valid_count,
                cluster.cluster_id,
                cluster.mean_delay_ms,
                cluster.chunk_count
            ));
            let mut delay = DelayResult::new(cluster.mean_delay_ms, "Nearest Cluster", cluster.chunk_count)
                .with_fallback()
                .with_details(format!(
                    "cluster {} of {} disagreeing valid clusters",
                    cluster.cluster_id, valid_count
                ));
            delay.unverified = true;
            return Ok(delay);
        }
    }
    select_delay(chunks, Some(diagnosis), &settings.selection)
}

fn log_stability_summary(logger: &JobLogger, results: &BTreeMap<String, CorrelationResult>) {
    logger.info("=== STABILITY SUMMARY ===");
    for (source, result) in results {
        match &result.stability {
            Some(stability) => {
                let mut line = format!(
                    "  {}: {} (spread {:.3}ms, std {:.3}ms, {} outlier(s), {}/{} chunks)",
                    source,
                    stability.status(),
                    stability.max_variance_ms,
                    stability.std_dev_ms,
                    stability.outlier_count,
                    result.accepted_count,
                    result.total_count
                );
                if let Some(reason) = &stability.reason {
                    line.push_str(&format!(" - {}", reason));
                }
                logger.info(&line);
            }
            None => logger.info(&format!("  {}: not measured", source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::diagnosis::DiagnosisType;
    use crate::analysis::methods::test_signals::noise;
    use crate::logging::LogConfig;
    use crate::models::{DelaySelectionMode, FallbackMode, QualityMode};

    const SR: u32 = 8000;

    fn logger() -> JobLogger {
        JobLogger::detached("analyzer-test", LogConfig::default(), None)
    }

    fn settings() -> EngineSettings {
        let mut settings = EngineSettings::default();
        settings.correlation.sample_rate_hz = SR;
        settings.chunks.scan_chunk_duration = 4.0;
        settings
    }

    fn context() -> DiagnosisContext {
        DiagnosisContext {
            framerate: Some(23.976),
            codec_id: Some("A_AAC".to_string()),
            chunk_duration_s: 4.0,
        }
    }

    /// 60 s of noise; the target lags by `early` samples before 30 s and by
    /// `late` samples after.
    fn stepped_pair(early: usize, late: usize) -> (AudioData, AudioData) {
        let reference = noise(SR as usize * 60, 21);
        let boundary = SR as usize * 30;
        let target = (0..reference.len())
            .map(|i| {
                let shift = if i < boundary { early } else { late };
                if i >= shift {
                    reference[i - shift]
                } else {
                    0.0
                }
            })
            .collect();
        (AudioData::new(reference, SR), AudioData::new(target, SR))
    }

    #[test]
    fn uniform_pair_selects_constant_delay() {
        let settings = settings();
        let log = logger();
        let runner = CorrelationRunner::new(&settings, &log, CancellationToken::new());
        let (reference, target) = stepped_pair(80, 80);

        let analysis = analyze_pair(&runner, "Source 2", &reference, &target, &context()).unwrap();
        let diagnosis = analysis.result.diagnosis.as_ref().unwrap();
        assert_eq!(diagnosis.diagnosis_type, DiagnosisType::Uniform);
        assert_eq!(analysis.delay.rounded_ms, 10);
        assert!(!analysis.delay.fallback_used);
        assert!(analysis.result.edl.is_empty());
        assert!(analysis.result.stability.as_ref().unwrap().max_variance_ms < 0.5);
        assert_eq!(analysis.result.final_delay.as_ref(), Some(&analysis.delay));
    }

    #[test]
    fn correctable_stepping_builds_edl() {
        let mut settings = settings();
        settings.selection.delay_selection_mode = DelaySelectionMode::ModeEarly;
        let log = logger();
        let runner = CorrelationRunner::new(&settings, &log, CancellationToken::new());
        // 10 ms, then 200 ms
        let (reference, target) = stepped_pair(80, 1600);

        let analysis = analyze_pair(&runner, "Source 2", &reference, &target, &context()).unwrap();
        let diagnosis = analysis.result.diagnosis.as_ref().unwrap();
        assert_eq!(diagnosis.diagnosis_type, DiagnosisType::Stepping);
        assert!(diagnosis.is_correctable());
        assert_eq!(analysis.delay.rounded_ms, 10);

        let edl = &analysis.result.edl;
        assert_eq!(edl.len(), 2);
        assert_eq!(edl[0].delay_ms, 10);
        assert_eq!(edl[1].delay_ms, 200);
        // Chunk 5 starts at 25.22 s, chunk 6 at 30.78 s.
        assert!((edl[1].start_s - 28.0).abs() < 1e-6);
        assert!((edl[1].end_s - 60.0).abs() < 1e-6);
        assert!(analysis.result.stability.as_ref().unwrap().is_stepping);
    }

    #[test]
    fn uncorrectable_disagreement_follows_fallback_mode() {
        let mut settings = settings();
        settings.stepping.quality_mode = QualityMode::Custom;
        settings.stepping.custom_thresholds.min_total_clusters = 3;
        let log = logger();
        let (reference, target) = stepped_pair(80, 1600);

        let runner = CorrelationRunner::new(&settings, &log, CancellationToken::new());
        let analysis = analyze_pair(&runner, "Source 2", &reference, &target, &context()).unwrap();
        assert!(!analysis.result.diagnosis.as_ref().unwrap().is_correctable());
        assert!(analysis.result.edl.is_empty());
        assert!(analysis.delay.unverified);
        assert!(analysis.delay.fallback_used);
        // Equal sizes; the cleaner early cluster matches better.
        assert_eq!(analysis.delay.rounded_ms, 10);

        settings.stepping.fallback_mode = FallbackMode::Abort;
        let runner = CorrelationRunner::new(&settings, &log, CancellationToken::new());
        let err = analyze_pair(&runner, "Source 2", &reference, &target, &context()).unwrap_err();
        match err {
            AnalysisError::ClusterDisagreement { delays } => assert_eq!(delays, vec![10, 200]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn low_confidence_chunks_are_excluded_before_diagnosis() {
        let settings = EngineSettings::default();
        let log = logger();
        let mut chunks: Vec<ChunkResult> = (1..=8)
            .map(|i| ChunkResult::new(i, 60.0 * i as f64, 500.0 + (i % 2) as f64 * 0.4, 75.0, 50.0))
            .collect();
        chunks.push(ChunkResult::new(9, 540.0, 50.0, 5.0, 50.0));
        chunks.push(ChunkResult::new(10, 600.0, 50.0, 8.0, 50.0));
        let mut result = CorrelationResult::new("Source 2", "scc", chunks);

        let delay = evaluate_result(&mut result, &context(), &settings, &log, None).unwrap();
        assert_eq!(
            result.diagnosis.as_ref().unwrap().diagnosis_type,
            DiagnosisType::Uniform
        );
        assert_eq!(delay.rounded_ms, 500);

        // Selecting again from the same chunks gives the same answer.
        let again = evaluate_result(&mut result, &context(), &settings, &log, None).unwrap();
        assert_eq!(again, delay);
    }

    #[test]
    fn no_accepted_chunks_is_reported_not_zeroed() {
        let settings = EngineSettings::default();
        let log = logger();
        let chunks = (1..=10)
            .map(|i| ChunkResult::new(i, 10.0 * i as f64, 40.0, 12.0, 50.0))
            .collect();
        let mut result = CorrelationResult::new("Source 2", "scc", chunks);

        let err = evaluate_result(&mut result, &context(), &settings, &log, None).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::NoAcceptedChunks { accepted: 0, total: 10, .. }
        ));
        assert!(result.diagnosis.is_some());
        assert!(result.final_delay.is_none());
    }

    #[test]
    fn multi_mode_keeps_configured_method_primary() {
        let mut settings = settings();
        settings.multi_correlation.enabled = true;
        settings.correlation.correlation_method = "gcc_phat".to_string();
        let log = logger();
        let runner = CorrelationRunner::new(&settings, &log, CancellationToken::new());
        let (reference, target) = stepped_pair(80, 80);

        let analysis = analyze_pair(&runner, "Source 2", &reference, &target, &context()).unwrap();
        assert_eq!(analysis.result.correlation_method, "Phase Correlation (GCC-PHAT)");
        assert_eq!(analysis.comparisons.len(), 1);
        assert_eq!(analysis.comparisons[0].correlation_method, "Standard Correlation (SCC)");
        assert!(analysis.comparisons[0].final_delay.is_some());
        assert_eq!(analysis.delay.rounded_ms, 10);
    }

    #[test]
    fn remux_only_job_needs_no_decoding() {
        let spec = JobSpec::new().with_source(REFERENCE_SOURCE, AudioSource::new("/nonexistent/ref.mkv"));
        let job = analyze_job(&spec, &settings(), &logger(), &CancellationToken::new()).unwrap();
        assert_eq!(job.output_delay_ms(REFERENCE_SOURCE), Some(0));
        assert!(job.results.is_empty());
        assert_eq!(job.global_shift, GlobalShiftCalculation::default());
    }

    #[test]
    fn job_without_reference_or_readable_reference_fails() {
        let spec = JobSpec::new().with_source("Source 2", AudioSource::new("/nonexistent/b.mkv"));
        let err = analyze_job(&spec, &settings(), &logger(), &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, AnalysisError::SourceNotFound(ref s) if s == REFERENCE_SOURCE));

        let spec = spec.with_source(REFERENCE_SOURCE, AudioSource::new("/nonexistent/a.mkv"));
        let err = analyze_job(&spec, &settings(), &logger(), &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, AnalysisError::SourceNotFound(_)));
    }
}
