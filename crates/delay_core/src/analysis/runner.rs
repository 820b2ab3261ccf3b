//! Correlation runner.
//!
//! Turns a reference/target pair into per-chunk results:
//! 1. Resolve and decode the audio track of each file
//! 2. Separate (optional, both sides or neither) and filter
//! 3. Extract independent chunk copies
//! 4. Correlate every chunk in parallel, then restore chunk order
//!
//! The multi-algorithm variant prepares the chunks once and runs every
//! enabled algorithm over the same set.

use std::path::PathBuf;

use rayon::prelude::*;

use super::chunks::{extract_chunks, ChunkConfig};
use super::decode::decode_audio;
use super::filtering::{apply_filter, FilterConfig};
use super::methods::{create_algorithm, create_from_name, CorrelationAlgorithm};
use super::separation::apply_separation;
use super::tracks::{probe_media, resolve_audio_track, AudioTrack, MediaInfo};
use super::types::{
    AnalysisError, AnalysisResult, AudioChunk, AudioData, CancellationToken, ChunkResult,
    CorrelationResult,
};
use crate::config::EngineSettings;
use crate::logging::JobLogger;
use crate::models::{CorrelationMethod, FilteringMethod};

/// Chunks needed before a run counts as a measurement rather than a guess.
pub const MIN_CHUNKS: usize = 2;

/// A media file and the audio track to analyze in it.
#[derive(Debug, Clone)]
pub struct AudioSource {
    pub path: PathBuf,
    /// Explicit 0-based audio stream index.
    pub track_index: Option<usize>,
    /// Preferred language when no index is given (2 or 3 letter code).
    pub language: Option<String>,
}

impl AudioSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            track_index: None,
            language: None,
        }
    }

    pub fn with_track(mut self, index: usize) -> Self {
        self.track_index = Some(index);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Decoded audio plus what was learned while probing the file.
#[derive(Debug, Clone)]
pub struct DecodedSource {
    pub audio: AudioData,
    pub track: AudioTrack,
    pub media: MediaInfo,
}

/// Runs correlation for one job.
///
/// Holds the job's settings and logger by reference. With
/// `correlation.max_workers > 0` chunk work runs on a dedicated pool of that
/// size, otherwise on rayon's global pool.
pub struct CorrelationRunner<'a> {
    settings: &'a EngineSettings,
    logger: &'a JobLogger,
    cancel: CancellationToken,
    pool: Option<rayon::ThreadPool>,
}

impl<'a> CorrelationRunner<'a> {
    pub fn new(settings: &'a EngineSettings, logger: &'a JobLogger, cancel: CancellationToken) -> Self {
        let workers = settings.correlation.max_workers;
        let pool = if workers > 0 {
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => Some(pool),
                Err(e) => {
                    logger.warn(&format!(
                        "Could not create a {}-thread pool ({}), using the global pool",
                        workers, e
                    ));
                    None
                }
            }
        } else {
            None
        };

        Self {
            settings,
            logger,
            cancel,
            pool,
        }
    }

    pub fn settings(&self) -> &'a EngineSettings {
        self.settings
    }

    pub fn logger(&self) -> &'a JobLogger {
        self.logger
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Probe a file, pick its audio track and decode it.
    pub fn decode_source(&self, source_key: &str, source: &AudioSource) -> AnalysisResult<DecodedSource> {
        self.cancel.check()?;
        let path = &source.path;
        if !path.exists() {
            return Err(AnalysisError::SourceNotFound(path.display().to_string()));
        }

        self.logger.command(&format!("mkvmerge -J \"{}\"", path.display()));
        let media = probe_media(path)?;
        let tracks = media.audio_tracks();
        let track = resolve_audio_track(
            path,
            &tracks,
            source.track_index,
            source.language.as_deref(),
        )?
        .clone();
        self.logger
            .info(&format!("[{}] Selected: {}", source_key, track.describe()));

        let corr = &self.settings.correlation;
        self.logger.info(&format!("Decoding {} audio...", source_key));
        let audio = decode_audio(path, track.stream_index, corr.sample_rate_hz, corr.use_soxr_resampler)?;
        self.logger.info(&format!(
            "{} audio decoded: {:.1}s",
            source_key,
            audio.duration_secs()
        ));

        Ok(DecodedSource { audio, track, media })
    }

    /// Separate, filter and cut both buffers into chunks.
    ///
    /// No chunk at all is `InsufficientChunks`; a single chunk is allowed
    /// through with a warning and handled by the selector's fallback.
    pub fn prepare_chunks(&self, reference: &AudioData, target: &AudioData) -> AnalysisResult<Vec<AudioChunk>> {
        self.cancel.check()?;
        if reference.sample_rate != target.sample_rate {
            return Err(AnalysisError::InvalidAudio(format!(
                "sample rate mismatch: reference {} Hz, target {} Hz",
                reference.sample_rate, target.sample_rate
            )));
        }
        let sample_rate = reference.sample_rate;

        let pair = apply_separation(
            &reference.samples,
            &target.samples,
            sample_rate,
            &self.settings.separation,
            self.logger,
        );

        let filtering = &self.settings.filtering;
        let filter = FilterConfig::from_settings(filtering, sample_rate);
        let (ref_samples, tgt_samples) = if filtering.filtering_method == FilteringMethod::None {
            (pair.reference, pair.target)
        } else {
            self.logger.info(&format!(
                "Audio filtering: {} (low={:.0}Hz, high={:.0}Hz, order={})",
                filtering.filtering_method,
                filtering.filter_low_cutoff_hz,
                filtering.filter_high_cutoff_hz,
                filtering.filter_order
            ));
            (
                apply_filter(&pair.reference, &filter),
                apply_filter(&pair.target, &filter),
            )
        };

        let config = ChunkConfig::from(&self.settings.chunks);
        let chunks = extract_chunks(&ref_samples, &tgt_samples, sample_rate, &config);
        match chunks.len() {
            0 => Err(AnalysisError::InsufficientChunks {
                got: 0,
                required: MIN_CHUNKS,
            }),
            1 => {
                self.logger.warn(&format!(
                    "Only 1 chunk fits the scan window ({} required); result will be unverified",
                    MIN_CHUNKS
                ));
                Ok(chunks)
            }
            n => {
                self.logger.info(&format!(
                    "Analyzing {} chunks of {}s each",
                    n, config.chunk_duration_s
                ));
                Ok(chunks)
            }
        }
    }

    /// Correlate prepared chunks with one algorithm and log every result.
    pub fn correlate(
        &self,
        chunks: &[AudioChunk],
        algorithm: &dyn CorrelationAlgorithm,
        sample_rate: u32,
    ) -> AnalysisResult<Vec<ChunkResult>> {
        let threshold = self.settings.correlation.match_threshold_pct;
        let results = self.install(|| {
            correlate_chunks(chunks, algorithm, sample_rate, threshold, &self.cancel)
        })?;
        log_chunk_results(self.logger, &results);
        Ok(results)
    }

    /// Run the configured algorithm over a decoded pair.
    pub fn run(
        &self,
        source_key: &str,
        reference: &AudioData,
        target: &AudioData,
    ) -> AnalysisResult<CorrelationResult> {
        let corr = &self.settings.correlation;
        let algorithm = create_from_name(&corr.correlation_method, corr.audio_peak_fit)?;
        self.logger.info(&format!(
            "Method: {}, SOXR: {}, Peak fit: {}",
            algorithm.name(),
            corr.use_soxr_resampler,
            corr.audio_peak_fit
        ));

        let chunks = self.prepare_chunks(reference, target)?;
        let results = self.correlate(&chunks, algorithm.as_ref(), reference.sample_rate)?;
        Ok(CorrelationResult::new(source_key, algorithm.name(), results))
    }

    /// Run every enabled algorithm over one shared chunk set.
    ///
    /// Results come back in registry order. With no algorithm enabled the
    /// configured one is used alone.
    pub fn run_multi(
        &self,
        source_key: &str,
        reference: &AudioData,
        target: &AudioData,
    ) -> AnalysisResult<Vec<CorrelationResult>> {
        let corr = &self.settings.correlation;
        let mut methods = enabled_methods(self.settings);
        if methods.is_empty() {
            let configured = CorrelationMethod::from_name(&corr.correlation_method)
                .ok_or_else(|| AnalysisError::UnknownMethod(corr.correlation_method.clone()))?;
            self.logger.warn(&format!(
                "No multi-correlation methods enabled, using {}",
                configured.name()
            ));
            methods.push(configured);
        }

        let chunks = self.prepare_chunks(reference, target)?;
        let sample_rate = reference.sample_rate;
        let threshold = corr.match_threshold_pct;
        let peak_fit = corr.audio_peak_fit;
        let cancel = &self.cancel;

        let per_method: Vec<(CorrelationMethod, Vec<ChunkResult>)> = self.install(|| {
            methods
                .par_iter()
                .map(|&method| {
                    cancel.check()?;
                    let algorithm = create_algorithm(method, peak_fit);
                    correlate_chunks(&chunks, algorithm.as_ref(), sample_rate, threshold, cancel)
                        .map(|results| (method, results))
                })
                .collect::<AnalysisResult<Vec<_>>>()
        })?;

        let bar = "─".repeat(60);
        Ok(per_method
            .into_iter()
            .map(|(method, results)| {
                self.logger
                    .info(&format!("\n{}\n  Method: {}\n{}", bar, method.name(), bar));
                log_chunk_results(self.logger, &results);
                CorrelationResult::new(source_key, method.name(), results)
            })
            .collect())
    }
}

/// Methods switched on in `[multi_correlation]`, in registry order.
pub fn enabled_methods(settings: &EngineSettings) -> Vec<CorrelationMethod> {
    CorrelationMethod::all()
        .iter()
        .copied()
        .filter(|m| settings.multi_correlation.is_enabled(&m.config_key()))
        .collect()
}

/// Correlate chunks in parallel and return them in chunk order.
///
/// An algorithm error rejects only its own chunk. Cancellation is checked
/// before each chunk starts; chunks already running finish.
pub fn correlate_chunks(
    chunks: &[AudioChunk],
    algorithm: &dyn CorrelationAlgorithm,
    sample_rate: u32,
    match_threshold_pct: f64,
    cancel: &CancellationToken,
) -> AnalysisResult<Vec<ChunkResult>> {
    let mut results = chunks
        .par_iter()
        .map(|chunk| {
            cancel.check()?;
            let result = match algorithm.find_delay(&chunk.ref_samples, &chunk.target_samples, sample_rate) {
                Ok(estimate) => ChunkResult::new(
                    chunk.index,
                    chunk.start_time_s,
                    estimate.delay_ms,
                    estimate.confidence,
                    match_threshold_pct,
                ),
                Err(e) => {
                    tracing::warn!(
                        chunk = chunk.index,
                        method = algorithm.name(),
                        "chunk correlation failed: {}",
                        e
                    );
                    ChunkResult::failed(chunk.index, chunk.start_time_s)
                }
            };
            Ok(result)
        })
        .collect::<AnalysisResult<Vec<_>>>()?;

    results.sort_by_key(|r| r.chunk_index);
    Ok(results)
}

fn log_chunk_results(logger: &JobLogger, results: &[ChunkResult]) {
    let total = results.len();
    for result in results {
        logger.info(&format!(
            "Chunk {:2}/{} (@{:.1}s): delay = {:+} ms (raw={:+.3}, match={:.2}) — {}",
            result.chunk_index,
            total,
            result.start_time_s,
            result.delay_ms,
            result.raw_delay_ms,
            result.confidence,
            result.status_str()
        ));
    }
    let accepted = results.iter().filter(|r| r.accepted).count();
    logger.info(&format!("{}/{} chunks accepted", accepted, total));
}
