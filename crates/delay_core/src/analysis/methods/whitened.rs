//! Whitened cross-correlation method.
//!
//! Both spectra are flattened to unit magnitude before they are multiplied,
//! so the result follows timing alignment rather than spectral content.

use parking_lot::Mutex;
use rustfft::FftPlanner;

use super::xcorr::{gcc_estimate, Weighting};
use super::{validate_input, CorrelationAlgorithm};
use crate::analysis::types::{AnalysisResult, DelayEstimate};

/// Whitened cross-correlation.
pub struct Whitened {
    peak_fit: bool,
    planner: Mutex<FftPlanner<f64>>,
}

impl Whitened {
    pub fn new(peak_fit: bool) -> Self {
        Self {
            peak_fit,
            planner: Mutex::new(FftPlanner::new()),
        }
    }
}

impl Default for Whitened {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CorrelationAlgorithm for Whitened {
    fn name(&self) -> &'static str {
        "Whitened Cross-Correlation"
    }

    fn find_delay(
        &self,
        reference: &[f32],
        target: &[f32],
        sample_rate: u32,
    ) -> AnalysisResult<DelayEstimate> {
        validate_input(reference, target, sample_rate)?;
        gcc_estimate(
            &self.planner,
            reference,
            target,
            sample_rate,
            Weighting::Whiten,
            self.peak_fit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::methods::test_signals::{delayed, noise};

    #[test]
    fn whitened_recovers_offset_after_coloring() {
        let sr = 8000;
        let signal = noise(sr as usize, 31);
        // Symmetric smoothing colors the spectrum without moving the phase.
        let shifted = delayed(&signal, 120);
        let colored: Vec<f32> = (0..shifted.len())
            .map(|i| {
                let prev = if i > 0 { shifted[i - 1] } else { 0.0 };
                let next = shifted.get(i + 1).copied().unwrap_or(0.0);
                0.6 * shifted[i] + 0.2 * (prev + next)
            })
            .collect();

        let estimate = Whitened::new(false).find_delay(&signal, &colored, sr).unwrap();
        assert!((estimate.delay_ms - 15.0).abs() <= 1000.0 / sr as f64, "got {}", estimate.delay_ms);
    }
}
