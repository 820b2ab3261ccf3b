//! Mode (Clustered) delay selector.
//!
//! With two or more valid diagnosis clusters, takes the dominant one (most
//! chunks, then best mean match). Otherwise finds the most common rounded
//! delay, gathers every chunk within the tolerance of it and averages their
//! raw values, flagged as a fallback.

use std::collections::BTreeMap;

use super::{as_fallback, raw_mean, DelaySelector, SelectorConfig};
use crate::analysis::diagnosis::ClusterInfo;
use crate::analysis::types::{ChunkResult, DelayResult};

/// Mode Clustered selector.
pub struct ModeClusteredSelector;

impl ModeClusteredSelector {
    /// Mode with a ±tolerance band, ignoring diagnosis clusters.
    pub(super) fn select_by_tolerance(
        &self,
        chunks: &[ChunkResult],
        config: &SelectorConfig,
    ) -> Option<DelayResult> {
        let tolerance = config.cluster_tolerance_ms;

        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        for chunk in chunks {
            *counts.entry(chunk.delay_ms).or_default() += 1;
        }
        // Ties resolve to the smaller delay.
        let mode_delay = counts
            .iter()
            .max_by(|(da, ca), (db, cb)| ca.cmp(cb).then(db.cmp(da)))
            .map(|(&d, _)| d)?;

        let (raw_avg, used) = raw_mean(
            chunks
                .iter()
                .filter(|c| (c.delay_ms - mode_delay).abs() <= tolerance),
        )?;

        Some(
            DelayResult::new(raw_avg, self.name(), used).with_details(format!(
                "cluster around {:+}ms (±{}ms tolerance)",
                mode_delay, tolerance
            )),
        )
    }
}

impl DelaySelector for ModeClusteredSelector {
    fn name(&self) -> &'static str {
        "Mode (Clustered)"
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
            let dominant = clusters.iter().max_by(|a, b| {
                a.chunk_count
                    .cmp(&b.chunk_count)
                    .then(a.mean_match_pct.total_cmp(&b.mean_match_pct))
                    .then(b.cluster_id.cmp(&a.cluster_id))
            })?;
            let (raw_avg, used) = raw_mean(
                chunks
                    .iter()
                    .filter(|c| dominant.chunk_numbers.contains(&c.chunk_index)),
            )?;
            return Some(
                DelayResult::new(raw_avg, self.name(), used).with_details(format!(
                    "dominant cluster {} of {} ({} chunks)",
                    dominant.cluster_id,
                    clusters.len(),
                    dominant.chunk_count
                )),
            );
        }

        self.select_by_tolerance(chunks, config)
            .map(|result| as_fallback(result, self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{chunk, cluster};
    use super::*;

    #[test]
    fn uses_dominant_valid_cluster() {
        let chunks: Vec<_> = (1..=8)
            .map(|i| chunk(i, if i <= 3 { 100.0 } else { 400.4 }, i as f64 * 60.0))
            .collect();
        let clusters = vec![
            cluster(1, 100.0, &[1, 2, 3], 60.0),
            cluster(2, 400.4, &[4, 5, 6, 7, 8], 240.0),
        ];

        let result = ModeClusteredSelector
            .select(&chunks, &clusters, &SelectorConfig::default())
            .unwrap();
        assert_eq!(result.rounded_ms, 400);
        assert_eq!(result.chunks_used, 5);
        assert!(!result.fallback_used);
    }

    #[test]
    fn tolerance_fallback_gathers_neighbours() {
        let chunks = vec![
            chunk(1, -1000.2, 10.0),
            chunk(2, -1001.0, 20.0),
            chunk(3, -999.4, 30.0),
            chunk(4, -1000.0, 40.0),
            chunk(5, -500.0, 50.0),
        ];
        let result = ModeClusteredSelector
            .select(&chunks, &[], &SelectorConfig::default())
            .unwrap();

        assert!(result.fallback_used);
        assert_eq!(result.chunks_used, 4);
        // (-1000.2 - 1001.0 - 999.4 - 1000.0) / 4
        assert!((result.raw_ms + 1000.15).abs() < 1e-9);
        assert_eq!(result.rounded_ms, -1000);
    }
}
