//! GCC-SCOT (Smoothed Coherence Transform) method.
//!
//! Similar to GCC-PHAT but weights by signal coherence instead of just phase.
//! Better than PHAT when one signal has more noise than the other.

use parking_lot::Mutex;
use rustfft::FftPlanner;

use super::xcorr::{gcc_estimate, Weighting};
use super::{validate_input, CorrelationAlgorithm};
use crate::analysis::types::{AnalysisResult, DelayEstimate};

/// GCC-SCOT correlator.
///
/// Normalizes by the geometric mean of the auto-spectra, giving more weight
/// to frequencies where both signals are strong.
pub struct GccScot {
    peak_fit: bool,
    planner: Mutex<FftPlanner<f64>>,
}

impl GccScot {
    pub fn new(peak_fit: bool) -> Self {
        Self {
            peak_fit,
            planner: Mutex::new(FftPlanner::new()),
        }
    }
}

impl Default for GccScot {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CorrelationAlgorithm for GccScot {
    fn name(&self) -> &'static str {
        "GCC-SCOT"
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
            Weighting::Scot,
            self.peak_fit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::methods::test_signals::{delayed, noise, with_noise};

    #[test]
    fn gcc_scot_recovers_offset_with_noisy_target() {
        let sr = 16000;
        let signal = noise(sr as usize, 21);
        let target = with_noise(&delayed(&signal, -160), 0.3, 5);

        let estimate = GccScot::default().find_delay(&signal, &target, sr).unwrap();
        assert!((estimate.delay_ms + 10.0).abs() <= 1000.0 / sr as f64, "got {}", estimate.delay_ms);
        assert!((0.0..=100.0).contains(&estimate.confidence));
    }
}
