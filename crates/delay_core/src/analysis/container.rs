//! Container delays of the reference source.
//!
//! A track's container delay is its first presentation timestamp
//! (`minimum_timestamp`). The reference video defines the output timeline,
//! so reference audio delays are kept relative to the first video track and
//! folded into every correlation result measured against that audio.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::tracks::{normalize_language, MediaInfo, TrackKind};
use super::types::DelayResult;
use crate::logging::JobLogger;

/// Container delays of one source, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerDelays {
    /// Delay of the first video track.
    pub video_delay_ms: f64,
    /// Audio delays relative to the video track, keyed by track ID.
    pub audio_delays_ms: BTreeMap<i64, f64>,
    /// Relative delay of the audio track used for correlation.
    pub selected_audio_delay_ms: f64,
}

impl ContainerDelays {
    /// Collect delays from a probed file.
    ///
    /// Files without video keep audio delays as they are.
    pub fn from_media(info: &MediaInfo) -> Self {
        let video_delay_ms = info
            .first_video()
            .and_then(|t| t.minimum_timestamp_ns)
            .map(ns_to_ms)
            .unwrap_or(0.0);

        let audio_delays_ms = info
            .tracks
            .iter()
            .filter(|t| t.kind == TrackKind::Audio)
            .map(|t| {
                let absolute = t.minimum_timestamp_ns.map(ns_to_ms).unwrap_or(0.0);
                (t.id, absolute - video_delay_ms)
            })
            .collect();

        Self {
            video_delay_ms,
            audio_delays_ms,
            selected_audio_delay_ms: 0.0,
        }
    }

    /// Relative delay of a track, 0 for unknown tracks.
    pub fn audio_delay(&self, track_id: i64) -> f64 {
        self.audio_delays_ms.get(&track_id).copied().unwrap_or(0.0)
    }

    pub fn has_nonzero_audio_delay(&self) -> bool {
        self.audio_delays_ms.values().any(|d| *d != 0.0)
    }

    /// Log every non-zero delay.
    pub fn log_nonzero(&self, source_key: &str, logger: &JobLogger) {
        if self.video_delay_ms != 0.0 {
            logger.info(&format!(
                "[Container Delay] {} video has container delay: {:+.1}ms",
                source_key, self.video_delay_ms
            ));
        }
        for (id, delay) in self.audio_delays_ms.iter().filter(|(_, d)| **d != 0.0) {
            logger.info(&format!(
                "[Container Delay] {} audio track {} relative delay (audio - video): {:+.1}ms",
                source_key, id, delay
            ));
        }
    }
}

fn ns_to_ms(ns: i64) -> f64 {
    ns as f64 / 1_000_000.0
}

/// Correlation delay with the container delay folded in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalDelay {
    pub rounded_ms: i64,
    pub raw_ms: f64,
    pub correlation_rounded_ms: i64,
    pub correlation_raw_ms: f64,
    pub container_delay_ms: f64,
}

/// Add a container delay to a correlation result.
///
/// The rounded value is `round(correlation_rounded + container)`; the raw
/// value is `correlation_raw + container`.
pub fn calculate_delay_chain(
    correlation: &DelayResult,
    container_delay_ms: f64,
    source_key: &str,
    logger: &JobLogger,
) -> FinalDelay {
    let rounded_ms = (correlation.rounded_ms as f64 + container_delay_ms).round() as i64;
    let raw_ms = correlation.raw_ms + container_delay_ms;

    logger.info(&format!("[Delay Calculation] {} delay chain:", source_key));
    logger.info(&format!(
        "[Delay Calculation]   Correlation delay: {:+.3}ms (raw) -> {:+}ms (rounded)",
        correlation.raw_ms, correlation.rounded_ms
    ));
    if container_delay_ms != 0.0 {
        logger.info(&format!(
            "[Delay Calculation]   + Container delay:  {:+.3}ms",
            container_delay_ms
        ));
        logger.info(&format!(
            "[Delay Calculation]   = Final delay:      {:+.3}ms (raw) -> {:+}ms (rounded)",
            raw_ms, rounded_ms
        ));
    }

    FinalDelay {
        rounded_ms,
        raw_ms,
        correlation_rounded_ms: correlation.rounded_ms,
        correlation_raw_ms: correlation.raw_ms,
        container_delay_ms,
    }
}

/// Container delay of the reference audio track actually used for correlation.
///
/// An in-range explicit index takes priority, then the first language match,
/// the same order track resolution uses. Anything else keeps
/// `default_delay_ms`.
pub fn find_correlation_track_delay(
    delays: &ContainerDelays,
    info: &MediaInfo,
    explicit_index: Option<usize>,
    language: Option<&str>,
    default_delay_ms: f64,
    logger: &JobLogger,
) -> f64 {
    let audio = info.audio_tracks();

    let chosen = explicit_index
        .and_then(|index| audio.get(index))
        .or_else(|| {
            normalize_language(language).and_then(|lang| {
                audio.iter().find(|t| {
                    t.language
                        .as_deref()
                        .map(|l| l.trim().eq_ignore_ascii_case(&lang))
                        .unwrap_or(false)
                })
            })
        });

    match chosen {
        Some(track) => {
            let delay = delays.audio_delay(track.id);
            if delay != default_delay_ms {
                logger.info(&format!(
                    "[Container Delay Override] Using reference audio index {} (track ID {}) delay: \
                     {:+.3}ms (default was {:+.3}ms)",
                    track.stream_index, track.id, delay, default_delay_ms
                ));
            }
            delay
        }
        None => default_delay_ms,
    }
}
