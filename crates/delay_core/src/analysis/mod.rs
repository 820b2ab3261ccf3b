//! Audio delay analysis.
//!
//! Measures the offset between a reference source and each other source of
//! a job and explains how that offset behaves over time.
//!
//! # Architecture
//!
//! The pipeline is a chain of mostly pure stages; `analyzer` composes them:
//!
//! 1. **Tracks** (`tracks`, `container`): probe files with mkvmerge, pick the
//!    audio track, read container delays.
//!
//! 2. **Decoding** (`decode`): FFmpeg to mono f32 at the analysis rate.
//!
//! 3. **Preparation** (`separation`, `filtering`, `chunks`): optional stem
//!    separation in a worker process, optional band filter, chunk copies.
//!
//! 4. **Correlation** (`methods`, `runner`): one of seven algorithms per
//!    chunk, in parallel.
//!
//! 5. **Diagnosis** (`diagnosis`, `stability`): uniform, PAL drift, linear
//!    drift or stepping, plus spread and outliers.
//!
//! 6. **Selection** (`delay_selection`, `edl`): one delay per source and,
//!    for correctable stepping, the segment list.
//!
//! 7. **Global shift** (`global_shift`): offset the job so no delay is
//!    negative.
//!
//! # Usage
//!
//! ```no_run
//! use delay_core::analysis::{analyze_job, AudioSource, CancellationToken, JobSpec};
//! use delay_core::config::EngineSettings;
//! use delay_core::logging::{JobLogger, LogConfig};
//!
//! let spec = JobSpec::new()
//!     .with_source("Source 1", AudioSource::new("ref.mkv"))
//!     .with_source("Source 2", AudioSource::new("other.mkv").with_language("jpn"));
//! let settings = EngineSettings::default();
//! let logger = JobLogger::detached("episode_01", LogConfig::default(), None);
//!
//! let job = analyze_job(&spec, &settings, &logger, &CancellationToken::new()).unwrap();
//! println!("Source 2: {:?} ms", job.output_delay_ms("Source 2"));
//! ```

mod analyzer;
mod chunks;
mod container;
mod decode;
pub mod delay_selection;
pub mod diagnosis;
mod edl;
pub mod filtering;
mod global_shift;
pub mod methods;
mod peak_fit;
mod runner;
mod separation;
pub mod stability;
pub mod tracks;
pub mod types;

pub use analyzer::{
    analyze_job, analyze_pair, evaluate_result, JobAnalysis, JobSpec, SourceAnalysis,
    REFERENCE_SOURCE,
};
pub use chunks::{calculate_chunk_positions, extract_chunks, ChunkConfig};
pub use container::{
    calculate_delay_chain, find_correlation_track_delay, ContainerDelays, FinalDelay,
};
pub use decode::{decode_audio, DEFAULT_ANALYSIS_SAMPLE_RATE};
pub use delay_selection::{get_selector, select_delay, DelaySelector, SelectorConfig};
pub use diagnosis::{
    diagnose, resolve_cluster_disagreement, ClusterInfo, ClusterValidation, DiagnosisContext,
    DiagnosisType, DriftDiagnosis,
};
pub use edl::{build_edl, delay_at, EdlSegment};
pub use filtering::{apply_filter, FilterConfig};
pub use global_shift::{calculate_global_shift, Delays, GlobalShiftCalculation};
pub use methods::{create_algorithm, create_from_name, CorrelationAlgorithm};
pub use runner::{
    correlate_chunks, enabled_methods, AudioSource, CorrelationRunner, DecodedSource, MIN_CHUNKS,
};
pub use separation::{
    apply_separation, effective_timeout, separate_samples, SeparatedPair, SeparationRequest,
    SeparationResponse, MAX_TIMEOUT_S,
};
pub use stability::{analyze_stability, StabilityOutlier, StabilityResult};
pub use tracks::{
    normalize_language, parse_media_info, probe_media, resolve_audio_track, AudioTrack, MediaInfo,
};
pub use types::{
    AnalysisError, AnalysisResult, AudioChunk, AudioData, CancellationToken, ChunkResult,
    CorrelationResult, DelayEstimate, DelayResult,
};
