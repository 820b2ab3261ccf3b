//! First Stable delay selector.
//!
//! Splits the chunks into runs of consecutive chunks whose rounded delays
//! stay within the tolerance of the run's first chunk and returns the first
//! run meeting the minimum length.
//!
//! Critical for handling files with stepping (sync changes mid-file).

use super::{as_fallback, DelaySelector, ModeSelector, SelectorConfig};
use crate::analysis::diagnosis::ClusterInfo;
use crate::analysis::types::{ChunkResult, DelayResult};

/// First Stable selector: uses the first stable segment's delay.
pub struct FirstStableSelector;

/// Consecutive chunks with a consistent delay.
#[derive(Debug)]
struct Segment {
    delay_rounded: i64,
    start_time: f64,
    raw_delays: Vec<f64>,
}

impl Segment {
    fn new(chunk: &ChunkResult) -> Self {
        Self {
            delay_rounded: chunk.delay_ms,
            start_time: chunk.start_time_s,
            raw_delays: vec![chunk.raw_delay_ms],
        }
    }

    fn len(&self) -> usize {
        self.raw_delays.len()
    }

    fn raw_avg(&self) -> f64 {
        self.raw_delays.iter().sum::<f64>() / self.raw_delays.len().max(1) as f64
    }

    fn matches(&self, delay_rounded: i64, tolerance: i64) -> bool {
        (self.delay_rounded - delay_rounded).abs() <= tolerance
    }
}

fn segments(chunks: &[ChunkResult], tolerance: i64) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    for chunk in chunks {
        match segments.last_mut() {
            Some(seg) if seg.matches(chunk.delay_ms, tolerance) => seg.raw_delays.push(chunk.raw_delay_ms),
            _ => segments.push(Segment::new(chunk)),
        }
    }
    segments
}

impl DelaySelector for FirstStableSelector {
    fn name(&self) -> &'static str {
        "First Stable"
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

        let min_len = config.first_stable_min_chunks.max(1);
        let all = segments(chunks, config.cluster_tolerance_ms);
        let chosen = if config.first_stable_skip_unstable {
            all.into_iter().find(|s| s.len() >= min_len)
        } else {
            all.into_iter().next().filter(|s| s.len() >= min_len)
        };

        match chosen {
            Some(seg) => {
                let mut result = DelayResult::new(seg.raw_avg(), self.name(), seg.len()).with_details(
                    format!(
                        "{} chunks at {:+}ms (raw avg: {:.3}ms, starting at {:.1}s)",
                        seg.len(),
                        seg.delay_rounded,
                        seg.raw_avg(),
                        seg.start_time
                    ),
                );
                result.rounded_ms = seg.delay_rounded;
                Some(result)
            }
            None => ModeSelector
                .select(chunks, clusters, config)
                .map(|result| as_fallback(result, self.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::chunk;
    use super::*;

    #[test]
    fn finds_first_stable_segment() {
        let chunks = vec![
            chunk(1, -1000.0, 10.0),
            chunk(2, -1000.0, 20.0),
            chunk(3, -1000.0, 30.0),
            chunk(4, -2000.0, 40.0),
            chunk(5, -2000.0, 50.0),
            chunk(6, -2000.0, 60.0),
            chunk(7, -2000.0, 70.0),
        ];
        let result = FirstStableSelector
            .select(&chunks, &[], &SelectorConfig::default())
            .unwrap();
        assert_eq!(result.rounded_ms, -1000);
        assert_eq!(result.chunks_used, 3);
        assert!(!result.fallback_used);
    }

    #[test]
    fn skips_unstable_leading_segment() {
        let chunks = vec![
            chunk(1, 40.0, 10.0),
            chunk(2, -1000.0, 20.0),
            chunk(3, -1000.4, 30.0),
            chunk(4, -999.6, 40.0),
        ];
        let result = FirstStableSelector
            .select(&chunks, &[], &SelectorConfig::default())
            .unwrap();
        assert_eq!(result.rounded_ms, -1000);
        assert_eq!(result.chunks_used, 3);
    }

    #[test]
    fn falls_back_to_mode_without_a_stable_run() {
        let chunks = vec![
            chunk(1, 10.0, 10.0),
            chunk(2, 50.0, 20.0),
            chunk(3, 10.0, 30.0),
            chunk(4, 90.0, 40.0),
        ];
        let result = FirstStableSelector
            .select(&chunks, &[], &SelectorConfig::default())
            .unwrap();
        assert!(result.fallback_used);
        assert_eq!(result.rounded_ms, 10);
    }

    #[test]
    fn no_skip_requires_leading_segment() {
        let chunks = vec![
            chunk(1, 40.0, 10.0),
            chunk(2, -1000.0, 20.0),
            chunk(3, -1000.0, 30.0),
            chunk(4, -1000.0, 40.0),
        ];
        let config = SelectorConfig {
            first_stable_skip_unstable: false,
            ..Default::default()
        };
        let result = FirstStableSelector.select(&chunks, &[], &config).unwrap();
        assert!(result.fallback_used);
        assert_eq!(result.rounded_ms, -1000);
    }
}
