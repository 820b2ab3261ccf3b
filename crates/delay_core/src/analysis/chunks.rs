//! Chunk layout and extraction.
//!
//! Start times are spread evenly over the scan window of the reference
//! timeline; each chunk copies its reference and target samples out of the
//! decoded buffers.

use serde::{Deserialize, Serialize};

use super::types::AudioChunk;
use crate::config::ChunkSettings;

/// Configuration for chunk positioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Number of chunks to analyze.
    pub chunk_count: usize,
    /// Duration of each chunk in seconds.
    pub chunk_duration_s: f64,
    /// Start position as percentage (0-100).
    pub start_percentage: f64,
    /// End position as percentage (0-100).
    pub end_percentage: f64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_count: 10,
            chunk_duration_s: 15.0,
            start_percentage: 5.0,
            end_percentage: 95.0,
        }
    }
}

impl From<&ChunkSettings> for ChunkConfig {
    fn from(settings: &ChunkSettings) -> Self {
        Self {
            chunk_count: settings.scan_chunk_count as usize,
            chunk_duration_s: settings.scan_chunk_duration,
            start_percentage: settings.scan_start_percentage,
            end_percentage: settings.scan_end_percentage,
        }
    }
}

/// Evenly spaced chunk start times (seconds) for a timeline of `duration_s`.
///
/// The window begins at `start%` of the duration and spans whatever is left
/// of `end% - start%` after one chunk length; a window too short collapses
/// every chunk onto the start position.
pub fn calculate_chunk_positions(duration_s: f64, config: &ChunkConfig) -> Vec<f64> {
    if config.chunk_count == 0 || duration_s <= 0.0 {
        return Vec::new();
    }

    let scan_start = duration_s * (config.start_percentage / 100.0);
    let scan_end = duration_s * (config.end_percentage / 100.0);
    let scan_range = (scan_end - scan_start - config.chunk_duration_s).max(0.0);

    let step = scan_range / config.chunk_count.saturating_sub(1).max(1) as f64;

    (0..config.chunk_count)
        .map(|i| scan_start + step * i as f64)
        .collect()
}

/// Cut matched reference/target windows out of two decoded buffers.
///
/// Positions come from the reference duration. A chunk whose window would
/// run past the end of either buffer is skipped, so the result can be shorter
/// than `chunk_count`. Indices stay 1-based positions in the layout.
pub fn extract_chunks(
    reference: &[f32],
    target: &[f32],
    sample_rate: u32,
    config: &ChunkConfig,
) -> Vec<AudioChunk> {
    if sample_rate == 0 {
        return Vec::new();
    }

    let sr = sample_rate as f64;
    let duration_s = reference.len() as f64 / sr;
    let chunk_samples = (config.chunk_duration_s * sr).round() as usize;
    if chunk_samples == 0 {
        return Vec::new();
    }

    calculate_chunk_positions(duration_s, config)
        .into_iter()
        .enumerate()
        .filter_map(|(i, start_s)| {
            let start = (start_s * sr).round() as usize;
            let end = start + chunk_samples;
            if end > reference.len() || end > target.len() {
                tracing::debug!(chunk = i + 1, start_s, "chunk window exceeds audio, skipped");
                return None;
            }
            Some(AudioChunk {
                index: i + 1,
                start_time_s: start_s,
                ref_samples: reference[start..end].to_vec(),
                target_samples: target[start..end].to_vec(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculates_positions_for_standard_layout() {
        let config = ChunkConfig::default();

        let positions = calculate_chunk_positions(100.0, &config);

        assert_eq!(positions.len(), 10);
        assert!((positions[0] - 5.0).abs() < 1e-9);
        // scan_range = 95 - 5 - 15 = 75, step = 75 / 9
        let last_end = positions[9] + config.chunk_duration_s;
        assert!((last_end - 95.0).abs() < 1e-9);
    }

    #[test]
    fn single_chunk_sits_at_scan_start() {
        let config = ChunkConfig {
            chunk_count: 1,
            ..ChunkConfig::default()
        };
        assert_eq!(calculate_chunk_positions(200.0, &config), vec![10.0]);
    }

    #[test]
    fn short_timeline_collapses_to_start() {
        let config = ChunkConfig::default();
        let positions = calculate_chunk_positions(10.0, &config);
        assert_eq!(positions.len(), 10);
        assert!(positions.iter().all(|p| (*p - 0.5).abs() < 1e-9));
    }

    #[test]
    fn extracts_owned_copies_with_one_based_indices() {
        let sr = 100;
        let reference: Vec<f32> = (0..10_000).map(|i| i as f32).collect();
        let target = reference.clone();
        let config = ChunkConfig {
            chunk_count: 4,
            chunk_duration_s: 2.0,
            start_percentage: 0.0,
            end_percentage: 100.0,
        };

        let chunks = extract_chunks(&reference, &target, sr, &config);

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].index, 1);
        assert_eq!(chunks[3].index, 4);
        assert_eq!(chunks[0].ref_samples.len(), 200);
        assert_eq!(chunks[0].ref_samples[0], 0.0);
        // step = (100 - 2) / 3 s = 32.666 s -> sample 3267
        assert_eq!(chunks[1].ref_samples[0], 3267.0);
        assert_ne!(chunks[0].ref_samples.as_ptr(), reference.as_ptr());
    }

    #[test]
    fn skips_windows_past_shorter_target() {
        let sr = 100;
        let reference = vec![0.0f32; 10_000];
        let target = vec![0.0f32; 5_000];
        let config = ChunkConfig {
            chunk_count: 5,
            chunk_duration_s: 10.0,
            start_percentage: 0.0,
            end_percentage: 100.0,
        };

        let chunks = extract_chunks(&reference, &target, sr, &config);

        // starts at 0, 22.5, 45, 67.5, 90 s; only the first two fit in 50 s
        let indices: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn empty_inputs_produce_no_chunks() {
        let config = ChunkConfig::default();
        assert!(extract_chunks(&[], &[], 48000, &config).is_empty());
        assert!(extract_chunks(&[0.0; 10], &[0.0; 10], 0, &config).is_empty());
    }
}
