//! Standard Cross-Correlation (SCC) method.
//!
//! Both signals are standardized, correlated through the FFT and normalized
//! by their energies, so the peak magnitude is a correlation coefficient and
//! doubles as the confidence.

use parking_lot::Mutex;
use rustfft::FftPlanner;

use super::xcorr::{centered_peak, cross_correlate, samples_to_ms, standardize, to_f64, Weighting};
use super::{validate_input, CorrelationAlgorithm};
use crate::analysis::types::{AnalysisError, AnalysisResult, DelayEstimate};

/// Standard cross-correlation using FFT.
pub struct Scc {
    peak_fit: bool,
    planner: Mutex<FftPlanner<f64>>,
}

impl Scc {
    pub fn new(peak_fit: bool) -> Self {
        Self {
            peak_fit,
            planner: Mutex::new(FftPlanner::new()),
        }
    }
}

impl Default for Scc {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CorrelationAlgorithm for Scc {
    fn name(&self) -> &'static str {
        "Standard Correlation (SCC)"
    }

    fn find_delay(
        &self,
        reference: &[f32],
        target: &[f32],
        sample_rate: u32,
    ) -> AnalysisResult<DelayEstimate> {
        validate_input(reference, target, sample_rate)?;

        let mut reference = to_f64(reference);
        let mut target = to_f64(target);
        standardize(&mut reference);
        standardize(&mut target);

        let ref_energy: f64 = reference.iter().map(|x| x * x).sum();
        let tgt_energy: f64 = target.iter().map(|x| x * x).sum();
        let norm = (ref_energy * tgt_energy).sqrt() + 1e-9;

        let mut correlation = cross_correlate(&self.planner, &reference, &target, Weighting::None);
        for value in &mut correlation {
            *value /= norm;
        }

        let peak = centered_peak(&correlation, self.peak_fit)
            .ok_or_else(|| AnalysisError::InvalidAudio("Empty correlation".to_string()))?;

        Ok(DelayEstimate {
            delay_ms: samples_to_ms(peak.delay_samples, sample_rate),
            confidence: (peak.abs_corr[peak.index] * 100.0).clamp(0.0, 100.0),
        })
    }
}
