//! Average delay selector.
//!
//! Plain mean of all accepted raw delays, ignoring confidence.

use super::{raw_mean, DelaySelector, SelectorConfig};
use crate::analysis::diagnosis::ClusterInfo;
use crate::analysis::types::{ChunkResult, DelayResult};

pub struct AverageSelector;

impl DelaySelector for AverageSelector {
    fn name(&self) -> &'static str {
        "Average"
    }

    fn select(
        &self,
        chunks: &[ChunkResult],
        _clusters: &[ClusterInfo],
        config: &SelectorConfig,
    ) -> Option<DelayResult> {
        if chunks.len() < config.min_accepted_chunks {
            return None;
        }
        let (raw_avg, used) = raw_mean(chunks)?;
        Some(DelayResult::new(raw_avg, self.name(), used))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::chunk;
    use super::*;

    #[test]
    fn averages_raw_delays() {
        let chunks = vec![
            chunk(1, -1000.0, 10.0),
            chunk(2, -1002.0, 20.0),
            chunk(3, -1001.0, 30.0),
        ];
        let result = AverageSelector
            .select(&chunks, &[], &SelectorConfig::default())
            .unwrap();
        assert!((result.raw_ms + 1001.0).abs() < 1e-9);
        assert_eq!(result.rounded_ms, -1001);
        assert_eq!(result.chunks_used, 3);
    }

    #[test]
    fn ignores_confidence() {
        let chunks = vec![
            ChunkResult::new(1, 0.0, 0.0, 51.0, 50.0),
            ChunkResult::new(2, 1.0, 30.0, 99.0, 50.0),
            ChunkResult::new(3, 2.0, 60.0, 75.0, 50.0),
        ];
        let result = AverageSelector
            .select(&chunks, &[], &SelectorConfig::default())
            .unwrap();
        assert_eq!(result.rounded_ms, 30);
    }
}
