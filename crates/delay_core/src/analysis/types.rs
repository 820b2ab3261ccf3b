//! Core types for audio delay analysis.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::diagnosis::DriftDiagnosis;
use super::edl::EdlSegment;
use super::stability::StabilityResult;

/// Mono PCM decoded from one source.
#[derive(Debug, Clone)]
pub struct AudioData {
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioData {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// One time-aligned reference/target window.
///
/// Both buffers are owned copies so chunks can be processed on any thread.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// 1-based chunk number.
    pub index: usize,
    /// Start of the window in the reference timeline (seconds).
    pub start_time_s: f64,
    pub ref_samples: Vec<f32>,
    pub target_samples: Vec<f32>,
}

/// Output of a single algorithm call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayEstimate {
    /// Positive when the target lags the reference.
    pub delay_ms: f64,
    /// Match confidence, 0-100.
    pub confidence: f64,
}

/// Result of correlating one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    /// 1-based chunk number.
    pub chunk_index: usize,
    pub start_time_s: f64,
    /// Rounded delay in milliseconds.
    pub delay_ms: i64,
    pub raw_delay_ms: f64,
    /// Match confidence, 0-100.
    pub confidence: f64,
    /// `confidence >= match_threshold_pct`.
    pub accepted: bool,
}

impl ChunkResult {
    /// Build a result, deriving the rounded delay and acceptance.
    pub fn new(
        chunk_index: usize,
        start_time_s: f64,
        raw_delay_ms: f64,
        confidence: f64,
        match_threshold_pct: f64,
    ) -> Self {
        Self {
            chunk_index,
            start_time_s,
            delay_ms: raw_delay_ms.round() as i64,
            raw_delay_ms,
            confidence,
            accepted: confidence >= match_threshold_pct,
        }
    }

    /// Result for a chunk whose algorithm call failed.
    pub fn failed(chunk_index: usize, start_time_s: f64) -> Self {
        Self {
            chunk_index,
            start_time_s,
            delay_ms: 0,
            raw_delay_ms: 0.0,
            confidence: 0.0,
            accepted: false,
        }
    }

    pub fn status_str(&self) -> &'static str {
        if self.accepted {
            "ACCEPTED"
        } else {
            "REJECTED"
        }
    }
}

/// The single delay chosen for a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayResult {
    pub rounded_ms: i64,
    pub raw_ms: f64,
    /// Name of the selection mode that produced the value.
    pub method: String,
    /// A simpler mode was substituted for the configured one.
    pub fallback_used: bool,
    /// Picked from disagreeing clusters without confirmation.
    pub unverified: bool,
    pub chunks_used: usize,
    pub details: Option<String>,
}

impl DelayResult {
    pub fn new(raw_ms: f64, method: impl Into<String>, chunks_used: usize) -> Self {
        Self {
            rounded_ms: raw_ms.round() as i64,
            raw_ms,
            method: method.into(),
            fallback_used: false,
            unverified: false,
            chunks_used,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_fallback(mut self) -> Self {
        self.fallback_used = true;
        self
    }
}

/// Everything measured for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub source_key: String,
    /// Per-chunk results in chunk order.
    pub chunks: Vec<ChunkResult>,
    pub diagnosis: Option<DriftDiagnosis>,
    pub stability: Option<StabilityResult>,
    pub final_delay: Option<DelayResult>,
    /// Segments for stepping correction, empty unless correctable stepping.
    pub edl: Vec<EdlSegment>,
    pub correlation_method: String,
    pub accepted_count: usize,
    pub total_count: usize,
}

impl CorrelationResult {
    pub fn new(
        source_key: impl Into<String>,
        correlation_method: impl Into<String>,
        chunks: Vec<ChunkResult>,
    ) -> Self {
        let accepted_count = chunks.iter().filter(|c| c.accepted).count();
        let total_count = chunks.len();
        Self {
            source_key: source_key.into(),
            chunks,
            diagnosis: None,
            stability: None,
            final_delay: None,
            edl: Vec::new(),
            correlation_method: correlation_method.into(),
            accepted_count,
            total_count,
        }
    }

    /// Accepted chunks in chunk order.
    pub fn accepted_chunks(&self) -> Vec<ChunkResult> {
        accepted(&self.chunks)
    }
}

/// Copy out the accepted chunks, preserving order.
pub fn accepted(chunks: &[ChunkResult]) -> Vec<ChunkResult> {
    chunks.iter().filter(|c| c.accepted).cloned().collect()
}

/// Shared flag for cooperative job cancellation.
///
/// Clones observe the same flag. Work already running is allowed to finish;
/// only new chunk or algorithm work is refused.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> AnalysisResult<()> {
        if self.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Error types for analysis operations.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Decoder produced no usable samples.
    #[error("Decode failed for {path}: {reason}")]
    DecodeFailure { path: String, reason: String },

    /// No audio stream matched the request.
    #[error("No audio track found in {path}: {reason}")]
    TrackResolutionFailure { path: String, reason: String },

    /// Fewer chunk windows fit than the analysis needs.
    #[error("Insufficient chunks: got {got} of {required} required")]
    InsufficientChunks { got: usize, required: usize },

    /// Not enough chunks passed the match threshold.
    #[error("No valid result: {accepted} accepted of {total} chunks ({required} required)")]
    NoAcceptedChunks {
        accepted: usize,
        required: usize,
        total: usize,
    },

    /// Two or more valid stepping clusters disagree.
    #[error("Stepping clusters disagree on the delay: {delays:?} ms")]
    ClusterDisagreement { delays: Vec<i64> },

    /// Invalid audio data.
    #[error("Invalid audio data: {0}")]
    InvalidAudio(String),

    /// Algorithm name not in the registry.
    #[error("Unknown correlation method: {0}")]
    UnknownMethod(String),

    /// Source file not found.
    #[error("Source file not found: {0}")]
    SourceNotFound(String),

    /// An external tool could not be run or exited with an error.
    #[error("{tool} failed: {message}")]
    ProcessFailed { tool: String, message: String },

    /// Job was cancelled.
    #[error("Analysis cancelled")]
    Cancelled,

    /// Separation worker failed; callers fall back to the original audio.
    #[error("Source separation failed: {0}")]
    SeparationFailed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    pub fn process_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProcessFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Type alias for analysis results.
pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_result_rounds_and_accepts() {
        let chunk = ChunkResult::new(3, 120.0, 119.6, 50.0, 50.0);
        assert_eq!(chunk.delay_ms, 120);
        assert!(chunk.accepted);
        assert_eq!(chunk.status_str(), "ACCEPTED");

        let rejected = ChunkResult::new(4, 130.0, -80.4, 49.99, 50.0);
        assert_eq!(rejected.delay_ms, -80);
        assert!(!rejected.accepted);
    }

    #[test]
    fn correlation_result_counts() {
        let chunks = vec![
            ChunkResult::new(1, 0.0, 10.0, 90.0, 50.0),
            ChunkResult::new(2, 10.0, 10.0, 20.0, 50.0),
            ChunkResult::failed(3, 20.0),
        ];
        let result = CorrelationResult::new("Source 2", "scc", chunks);
        assert_eq!(result.accepted_count, 1);
        assert_eq!(result.total_count, 3);
        assert!(result.accepted_count <= result.total_count);
        assert_eq!(result.accepted_chunks()[0].chunk_index, 1);
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(matches!(token.check(), Err(AnalysisError::Cancelled)));
    }

    #[test]
    fn audio_duration() {
        let audio = AudioData::new(vec![0.0; 48000 * 2], 48000);
        assert!((audio.duration_secs() - 2.0).abs() < 1e-9);
        assert_eq!(AudioData::new(vec![], 0).duration_secs(), 0.0);
    }
}
