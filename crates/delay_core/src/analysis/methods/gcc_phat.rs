//! GCC-PHAT (Generalized Cross-Correlation with Phase Transform) method.
//!
//! Uses phase-only correlation which is more robust to reverberation
//! and amplitude differences between signals.

use parking_lot::Mutex;
use rustfft::FftPlanner;

use super::xcorr::{gcc_estimate, Weighting};
use super::{validate_input, CorrelationAlgorithm};
use crate::analysis::types::{AnalysisResult, DelayEstimate};

/// GCC-PHAT correlator.
///
/// Normalizes the cross-spectrum by its magnitude, keeping only phase
/// information. This makes it robust to:
/// - Different recording levels
/// - Reverberation
/// - Some spectral differences
pub struct GccPhat {
    peak_fit: bool,
    /// Cached FFT planner for efficiency.
    planner: Mutex<FftPlanner<f64>>,
}

impl GccPhat {
    /// Create a new GCC-PHAT correlator.
    pub fn new(peak_fit: bool) -> Self {
        Self {
            peak_fit,
            planner: Mutex::new(FftPlanner::new()),
        }
    }
}

impl Default for GccPhat {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CorrelationAlgorithm for GccPhat {
    fn name(&self) -> &'static str {
        "Phase Correlation (GCC-PHAT)"
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
            Weighting::Phat,
            self.peak_fit,
        )
    }
}
