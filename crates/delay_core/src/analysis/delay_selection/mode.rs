//! Mode (Most Common) delay selector.
//!
//! Selects the most frequently occurring rounded delay. Ties go to the value
//! backed by the most confident chunk, then to the one seen first. The raw
//! delay is the average of all chunks with that rounded value.

use std::collections::BTreeMap;

use super::{raw_mean, DelaySelector, SelectorConfig};
use crate::analysis::diagnosis::ClusterInfo;
use crate::analysis::types::{ChunkResult, DelayResult};

/// Mode selector: picks the most common rounded delay.
pub struct ModeSelector;

impl DelaySelector for ModeSelector {
    fn name(&self) -> &'static str {
        "Mode (Most Common)"
    }

    fn select(
        &self,
        chunks: &[ChunkResult],
        _clusters: &[ClusterInfo],
        config: &SelectorConfig,
    ) -> Option<DelayResult> {
        if chunks.is_empty() || chunks.len() < config.min_accepted_chunks {
            return None;
        }

        let mut groups: BTreeMap<i64, Vec<&ChunkResult>> = BTreeMap::new();
        for chunk in chunks {
            groups.entry(chunk.delay_ms).or_default().push(chunk);
        }

        let (mode_delay, mode_chunks) = groups.into_iter().max_by(|(_, a), (_, b)| {
            a.len()
                .cmp(&b.len())
                .then(best_confidence(a).total_cmp(&best_confidence(b)))
                .then(first_index(b).cmp(&first_index(a)))
        })?;

        let (raw_avg, used) = raw_mean(mode_chunks.iter().copied())?;
        let mut result = DelayResult::new(raw_avg, self.name(), used).with_details(format!(
            "{} of {} chunks at {:+}ms",
            used,
            chunks.len(),
            mode_delay
        ));
        result.rounded_ms = mode_delay;
        Some(result)
    }
}

fn best_confidence(group: &[&ChunkResult]) -> f64 {
    group.iter().map(|c| c.confidence).fold(f64::MIN, f64::max)
}

fn first_index(group: &[&ChunkResult]) -> usize {
    group.iter().map(|c| c.chunk_index).min().unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::chunk;
    use super::*;

    #[test]
    fn selects_most_common() {
        let chunks = vec![
            chunk(1, -1000.7, 10.0),
            chunk(2, -1000.8, 20.0),
            chunk(3, -1001.2, 30.0),
            chunk(4, -500.0, 40.0),
        ];
        let result = ModeSelector.select(&chunks, &[], &SelectorConfig::default()).unwrap();

        assert_eq!(result.rounded_ms, -1001);
        assert_eq!(result.chunks_used, 3);
        assert!((result.raw_ms + 1000.9).abs() < 1e-9);
    }

    #[test]
    fn tie_goes_to_highest_confidence() {
        let chunks = vec![
            ChunkResult::new(1, 0.0, 100.0, 60.0, 50.0),
            ChunkResult::new(2, 60.0, 100.0, 61.0, 50.0),
            ChunkResult::new(3, 120.0, 200.0, 99.0, 50.0),
            ChunkResult::new(4, 180.0, 200.0, 55.0, 50.0),
        ];
        let result = ModeSelector.select(&chunks, &[], &SelectorConfig::default()).unwrap();
        assert_eq!(result.rounded_ms, 200);
    }

    #[test]
    fn full_tie_goes_to_earliest() {
        let chunks = vec![
            chunk(1, 300.0, 0.0),
            chunk(2, 100.0, 60.0),
            chunk(3, 100.0, 120.0),
            chunk(4, 300.0, 180.0),
        ];
        let result = ModeSelector.select(&chunks, &[], &SelectorConfig::default()).unwrap();
        assert_eq!(result.rounded_ms, 300);
    }

    #[test]
    fn too_few_chunks_is_none() {
        let chunks = vec![chunk(1, 5.0, 0.0), chunk(2, 5.0, 10.0)];
        assert!(ModeSelector.select(&chunks, &[], &SelectorConfig::default()).is_none());
    }
}
