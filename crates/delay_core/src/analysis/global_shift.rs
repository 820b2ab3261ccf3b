//! Global shift calculation to eliminate negative delays.
//!
//! Players and muxers do not handle negative container delays reliably, so
//! in `positive_only` mode every delay of a job is offset by the smallest
//! constant that makes the most negative one zero. Relative timing between
//! sources is preserved.
//!
//! ```text
//! most_negative = min(audio source delays, reference audio container delays)
//! shift         = max(0, -most_negative)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::container::ContainerDelays;
use crate::logging::JobLogger;
use crate::models::SyncMode;

/// Per-source delays of one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delays {
    /// Rounded delays per source in milliseconds.
    #[serde(default)]
    pub source_delays_ms: BTreeMap<String, i64>,
    /// Raw (unrounded) delays per source.
    #[serde(default)]
    pub raw_source_delays_ms: BTreeMap<String, f64>,
    /// Raw delays as measured, before any shift.
    #[serde(default)]
    pub pre_shift_delays_ms: BTreeMap<String, f64>,
    /// Global shift applied to all tracks (rounded).
    #[serde(default)]
    pub global_shift_ms: i64,
    /// Raw global shift for precision.
    #[serde(default)]
    pub raw_global_shift_ms: f64,
}

impl Delays {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay for a source.
    pub fn set_delay(&mut self, source: impl Into<String>, rounded_ms: i64, raw_ms: f64) {
        let source = source.into();
        self.source_delays_ms.insert(source.clone(), rounded_ms);
        self.raw_source_delays_ms.insert(source.clone(), raw_ms);
        self.pre_shift_delays_ms.insert(source, raw_ms);
    }

    /// Add an applied shift to every source.
    ///
    /// Returns the rounded shift that was added (0 when not applied).
    pub fn apply_global_shift(&mut self, shift: &GlobalShiftCalculation, logger: &JobLogger) -> i64 {
        if !shift.applied {
            return 0;
        }

        logger.info("[Delay] Adjusted delays after global shift:");
        for (source, delay) in self.source_delays_ms.iter_mut() {
            let raw = self.raw_source_delays_ms.entry(source.clone()).or_insert(*delay as f64);
            let (before, raw_before) = (*delay, *raw);
            *delay += shift.shift_ms;
            *raw += shift.raw_shift_ms;
            logger.info(&format!(
                "  - {}: {:+}ms -> {:+}ms (raw: {:+.3}ms -> {:+.3}ms)",
                source, before, delay, raw_before, raw
            ));
        }
        self.global_shift_ms = shift.shift_ms;
        self.raw_global_shift_ms = shift.raw_shift_ms;
        shift.shift_ms
    }

    /// Rounded delay of a source, 0 when unknown.
    pub fn delay_ms(&self, source: &str) -> i64 {
        self.source_delays_ms.get(source).copied().unwrap_or(0)
    }
}

/// Outcome of the global shift calculation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalShiftCalculation {
    /// Non-negative rounded shift.
    pub shift_ms: i64,
    /// Non-negative raw shift.
    pub raw_shift_ms: f64,
    pub most_negative_ms: i64,
    pub most_negative_raw_ms: f64,
    /// Whether the shift is to be added to the delays.
    pub applied: bool,
}

/// Compute the shift that makes every audio-contributing delay non-negative.
///
/// `audio_sources` limits the sources considered; `None` considers all of
/// them. Non-zero reference audio container delays are considered too. In
/// `allow_negative` mode the shift is computed and reported but not applied.
pub fn calculate_global_shift(
    delays: &Delays,
    audio_sources: Option<&BTreeSet<String>>,
    container: Option<&ContainerDelays>,
    sync_mode: SyncMode,
    logger: &JobLogger,
) -> GlobalShiftCalculation {
    logger.info("--- Calculating Global Shift ---");

    let mut rounded: Vec<i64> = Vec::new();
    let mut raw: Vec<f64> = Vec::new();

    for (source, &delay) in &delays.source_delays_ms {
        if audio_sources.map_or(true, |set| set.contains(source)) {
            let raw_delay = delays
                .raw_source_delays_ms
                .get(source)
                .copied()
                .unwrap_or(delay as f64);
            logger.info(&format!(
                "  - Considering delay from {}: {:+}ms (raw {:+.3}ms)",
                source, delay, raw_delay
            ));
            rounded.push(delay);
            raw.push(raw_delay);
        }
    }

    if let Some(container) = container.filter(|c| c.has_nonzero_audio_delay()) {
        logger.info("  - Considering reference audio container delays (video delays ignored).");
        for &delay in container.audio_delays_ms.values() {
            rounded.push(delay.round() as i64);
            raw.push(delay);
        }
    }

    let most_negative_ms = rounded.iter().copied().min().unwrap_or(0).min(0);
    let most_negative_raw_ms = raw.iter().copied().fold(0.0f64, f64::min);

    if most_negative_ms >= 0 && most_negative_raw_ms >= 0.0 {
        logger.info("[Delay] All relevant delays are non-negative. No global shift needed.");
        return GlobalShiftCalculation {
            most_negative_ms,
            most_negative_raw_ms,
            ..Default::default()
        };
    }

    let shift = GlobalShiftCalculation {
        shift_ms: -most_negative_ms,
        raw_shift_ms: -most_negative_raw_ms,
        most_negative_ms,
        most_negative_raw_ms,
        applied: sync_mode == SyncMode::PositiveOnly,
    };

    logger.info(&format!(
        "[Delay] Most negative relevant delay: {}ms (rounded), {:.3}ms (raw)",
        most_negative_ms, most_negative_raw_ms
    ));
    if shift.applied {
        logger.info(&format!(
            "[Delay] Applying lossless global shift: +{}ms (rounded), +{:.3}ms (raw)",
            shift.shift_ms, shift.raw_shift_ms
        ));
    } else {
        logger.info(&format!(
            "[Delay] Allow negative mode - global shift of +{}ms not applied.",
            shift.shift_ms
        ));
    }
    shift
}
