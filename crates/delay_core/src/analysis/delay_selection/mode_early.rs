//! Mode (Early Cluster) delay selector.
//!
//! Prefers the delay that holds at the start of the file. With two or more
//! valid diagnosis clusters the earliest one wins. Otherwise the most
//! common delay in the first `early_cluster_window` chunks is used if it
//! reaches `early_cluster_threshold`, and clustered mode is the last resort.

use super::{as_fallback, raw_mean, DelaySelector, ModeClusteredSelector, SelectorConfig};
use crate::analysis::diagnosis::ClusterInfo;
use crate::analysis::types::{ChunkResult, DelayResult};

/// Mode Early selector.
pub struct ModeEarlySelector;

impl ModeEarlySelector {
    fn select_early_window(
        &self,
        chunks: &[ChunkResult],
        config: &SelectorConfig,
    ) -> Option<DelayResult> {
        let tolerance = config.cluster_tolerance_ms;
        let window = config.early_cluster_window.min(chunks.len());
        let early = &chunks[..window];

        // (delay, count within tolerance) in order of first appearance.
        let mut candidates: Vec<(i64, usize)> = Vec::new();
        for chunk in early {
            if candidates.iter().any(|(d, _)| *d == chunk.delay_ms) {
                continue;
            }
            let count = early
                .iter()
                .filter(|c| (c.delay_ms - chunk.delay_ms).abs() <= tolerance)
                .count();
            candidates.push((chunk.delay_ms, count));
        }

        // Ties go to the delay seen first.
        let (best_delay, early_count) = candidates
            .into_iter()
            .filter(|(_, count)| *count >= config.early_cluster_threshold)
            .rev()
            .max_by_key(|(_, count)| *count)?;

        let (raw_avg, used) = raw_mean(
            chunks
                .iter()
                .filter(|c| (c.delay_ms - best_delay).abs() <= tolerance),
        )?;
        Some(
            DelayResult::new(raw_avg, self.name(), used).with_details(format!(
                "early stable cluster around {:+}ms ({} in first {} chunks)",
                best_delay, early_count, window
            )),
        )
    }
}

impl DelaySelector for ModeEarlySelector {
    fn name(&self) -> &'static str {
        "Mode (Early Cluster)"
    }

    fn select(
        &self,
        chunks: &[ChunkResult],
        clusters: &[ClusterInfo],
        config: &SelectorConfig,
    ) -> Option<DelayResult> {
        if chunks.is_empty() || chunks.len() < config.min_accepted_chunks {
            return None;
        }

        if clusters.len() >= 2 {
            let earliest = clusters
                .iter()
                .min_by(|a, b| a.time_range.0.total_cmp(&b.time_range.0))?;
            let (raw_avg, used) = raw_mean(
                chunks
                    .iter()
                    .filter(|c| earliest.chunk_numbers.contains(&c.chunk_index)),
            )?;
            return Some(
                DelayResult::new(raw_avg, self.name(), used).with_details(format!(
                    "earliest valid cluster {} starting at {:.1}s",
                    earliest.cluster_id, earliest.time_range.0
                )),
            );
        }

        self.select_early_window(chunks, config)
            .or_else(|| ModeClusteredSelector.select_by_tolerance(chunks, config))
            .map(|result| as_fallback(result, self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{chunk, cluster};
    use super::*;

    #[test]
    fn earliest_valid_cluster_wins() {
        let chunks: Vec<_> = (1..=9)
            .map(|i| chunk(i, if i <= 3 { -1000.0 } else { -2000.0 }, i as f64 * 60.0))
            .collect();
        let clusters = vec![
            cluster(1, -1000.0, &[1, 2, 3], 60.0),
            cluster(2, -2000.0, &[4, 5, 6, 7, 8, 9], 240.0),
        ];
        let result = ModeEarlySelector
            .select(&chunks, &clusters, &SelectorConfig::default())
            .unwrap();
        assert_eq!(result.rounded_ms, -1000);
        assert!(!result.fallback_used);
    }

    #[test]
    fn prioritizes_early_stable_delay() {
        let chunks: Vec<_> = (1..=12)
            .map(|i| chunk(i, if i <= 5 { -1000.0 } else { -2000.0 }, i as f64 * 10.0))
            .collect();
        let result = ModeEarlySelector
            .select(&chunks, &[], &SelectorConfig::default())
            .unwrap();

        assert_eq!(result.rounded_ms, -1000);
        assert_eq!(result.chunks_used, 5);
        assert!(result.fallback_used);
    }

    #[test]
    fn falls_back_to_clustered_if_no_early_stable() {
        let chunks = vec![
            chunk(1, -100.0, 10.0),
            chunk(2, -200.0, 20.0),
            chunk(3, -300.0, 30.0),
            chunk(4, -1000.0, 40.0),
            chunk(5, -1000.0, 50.0),
            chunk(6, -1000.0, 60.0),
        ];
        let config = SelectorConfig {
            early_cluster_window: 3,
            early_cluster_threshold: 3,
            ..Default::default()
        };

        let result = ModeEarlySelector.select(&chunks, &[], &config).unwrap();
        assert_eq!(result.rounded_ms, -1000);
        assert!(result.fallback_used);
        assert!(result.details.unwrap().contains("fallback"));
    }
}
