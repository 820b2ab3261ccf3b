//! Edit decision list for stepping corrections.
//!
//! Walks the accepted chunks in time order and emits one segment per run of
//! chunks belonging to the same valid cluster. Subtitle re-timing consumes
//! the segments to offset events by the delay in force at their timestamp.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::diagnosis::DriftDiagnosis;
use super::types::ChunkResult;

/// One constant-delay span of the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdlSegment {
    /// Segment start in reference seconds; the first segment starts at 0.
    pub start_s: f64,
    pub end_s: f64,
    /// Rounded cluster delay.
    pub delay_ms: i64,
    /// Mean raw delay of the cluster.
    pub delay_raw: f64,
    pub cluster_id: usize,
}

impl EdlSegment {
    pub fn contains(&self, time_s: f64) -> bool {
        time_s >= self.start_s && time_s < self.end_s
    }
}

/// Build segments from a stepping diagnosis.
///
/// Boundaries sit halfway between the last chunk of one run and the first
/// chunk of the next. The last segment ends at the later of `duration_s`
/// and the end of the final chunk. Non-stepping diagnoses yield no segments.
pub fn build_edl(
    diagnosis: &DriftDiagnosis,
    chunks: &[ChunkResult],
    chunk_duration_s: f64,
    duration_s: Option<f64>,
) -> Vec<EdlSegment> {
    if !diagnosis.is_stepping() {
        return Vec::new();
    }

    let cluster_of: BTreeMap<usize, usize> = diagnosis
        .valid_clusters
        .iter()
        .flat_map(|(&id, members)| members.iter().map(move |&chunk| (chunk, id)))
        .collect();
    let mean_of: BTreeMap<usize, f64> = diagnosis
        .cluster_details
        .iter()
        .map(|c| (c.cluster_id, c.mean_delay_ms))
        .collect();

    let mut ordered: Vec<(&ChunkResult, usize)> = chunks
        .iter()
        .filter(|c| c.accepted)
        .filter_map(|c| cluster_of.get(&c.chunk_index).map(|&id| (c, id)))
        .collect();
    ordered.sort_by(|a, b| a.0.start_time_s.total_cmp(&b.0.start_time_s));

    let mut segments: Vec<EdlSegment> = Vec::new();
    let mut last_start = 0.0;
    for (chunk, cluster_id) in ordered {
        let continues = segments.last().is_some_and(|s| s.cluster_id == cluster_id);
        if !continues {
            let start_s = match segments.last_mut() {
                Some(prev) => {
                    let boundary = (last_start + chunk.start_time_s) / 2.0;
                    prev.end_s = boundary;
                    boundary
                }
                None => 0.0,
            };
            let delay_raw = mean_of.get(&cluster_id).copied().unwrap_or(chunk.raw_delay_ms);
            segments.push(EdlSegment {
                start_s,
                end_s: start_s,
                delay_ms: delay_raw.round() as i64,
                delay_raw,
                cluster_id,
            });
        }
        last_start = chunk.start_time_s;
    }

    if let Some(last) = segments.last_mut() {
        last.end_s = duration_s.unwrap_or(0.0).max(last_start + chunk_duration_s);
    }
    segments
}

/// Delay in force at `time_s`, or `None` outside the list.
pub fn delay_at(segments: &[EdlSegment], time_s: f64) -> Option<i64> {
    segments.iter().find(|s| s.contains(time_s)).map(|s| s.delay_ms)
}
