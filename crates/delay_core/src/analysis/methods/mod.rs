//! Correlation algorithms.
//!
//! Every algorithm answers the same question for one reference/target pair:
//! how many milliseconds the target lags the reference, and how confident the
//! match is. The registry maps `CorrelationMethod` values, display names and
//! short keys to boxed implementations.

mod confidence;
mod dtw;
mod gcc_phat;
mod gcc_scot;
mod onset;
mod scc;
mod spectral;
mod spectrogram;
mod whitened;
mod xcorr;

pub use confidence::{normalize_peak_confidence, sigmoid_peak_confidence};
pub use dtw::Dtw;
pub use gcc_phat::GccPhat;
pub use gcc_scot::GccScot;
pub use onset::Onset;
pub use scc::Scc;
pub use spectrogram::Spectrogram;
pub use whitened::Whitened;

use crate::analysis::types::{AnalysisError, AnalysisResult, DelayEstimate};
use crate::models::CorrelationMethod;

/// A delay estimator over one chunk pair.
///
/// Positive `delay_ms` means the target lags the reference. Implementations
/// are stateless apart from cached FFT plans and may be shared across
/// threads.
pub trait CorrelationAlgorithm: Send + Sync {
    /// Human-readable name.
    fn name(&self) -> &'static str;

    /// Estimate the delay between `reference` and `target`.
    fn find_delay(
        &self,
        reference: &[f32],
        target: &[f32],
        sample_rate: u32,
    ) -> AnalysisResult<DelayEstimate>;
}

/// Create the implementation for a method.
///
/// `peak_fit` enables parabolic sub-sample refinement for the waveform
/// correlators (SCC and the GCC family).
pub fn create_algorithm(method: CorrelationMethod, peak_fit: bool) -> Box<dyn CorrelationAlgorithm> {
    match method {
        CorrelationMethod::Scc => Box::new(Scc::new(peak_fit)),
        CorrelationMethod::GccPhat => Box::new(GccPhat::new(peak_fit)),
        CorrelationMethod::GccScot => Box::new(GccScot::new(peak_fit)),
        CorrelationMethod::GccWhiten => Box::new(Whitened::new(peak_fit)),
        CorrelationMethod::Onset => Box::new(Onset::new()),
        CorrelationMethod::Dtw => Box::new(Dtw::new()),
        CorrelationMethod::Spectrogram => Box::new(Spectrogram::new()),
    }
}

/// Resolve a display name or short key and create the implementation.
pub fn create_from_name(name: &str, peak_fit: bool) -> AnalysisResult<Box<dyn CorrelationAlgorithm>> {
    CorrelationMethod::from_name(name)
        .map(|method| create_algorithm(method, peak_fit))
        .ok_or_else(|| AnalysisError::UnknownMethod(name.to_string()))
}

/// Reject inputs no algorithm can work with.
fn validate_input(reference: &[f32], target: &[f32], sample_rate: u32) -> AnalysisResult<()> {
    if reference.is_empty() || target.is_empty() {
        return Err(AnalysisError::InvalidAudio("Empty audio chunk".to_string()));
    }
    if sample_rate == 0 {
        return Err(AnalysisError::InvalidAudio("Sample rate is zero".to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_signals {
    //! Deterministic signals shared by the algorithm tests.

    /// Uniform pseudo-noise in [-1, 1) from a 64-bit LCG.
    pub fn noise(len: usize, seed: u64) -> Vec<f32> {
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((state >> 33) as f64 / (1u64 << 31) as f64 * 2.0 - 1.0) as f32
            })
            .collect()
    }

    /// Decaying bursts every `interval` samples, sharp attacks for onset tests.
    pub fn impulse_train(len: usize, interval: usize, seed: u64) -> Vec<f32> {
        let hiss = noise(len, seed);
        let mut samples = vec![0.0f32; len];
        let mut start = interval / 3;
        let mut burst = 0usize;
        while start < len {
            // Irregular amplitudes keep the envelope from being periodic.
            let gain = 0.4 + 0.6 * (((burst * 7919) % 13) as f32 / 12.0);
            for j in 0..interval.min(2400) {
                if start + j >= len {
                    break;
                }
                let decay = (-(j as f32) / 300.0).exp();
                samples[start + j] = gain * decay * hiss[start + j];
            }
            burst += 1;
            start += interval + (burst * 1237) % (interval / 2).max(1);
        }
        samples
    }

    /// `signal` delayed by `shift` samples (positive = target lags).
    pub fn delayed(signal: &[f32], shift: isize) -> Vec<f32> {
        let len = signal.len() as isize;
        (0..len)
            .map(|i| {
                let src = i - shift;
                if (0..len).contains(&src) {
                    signal[src as usize]
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Add scaled pseudo-noise.
    pub fn with_noise(signal: &[f32], level: f32, seed: u64) -> Vec<f32> {
        signal
            .iter()
            .zip(noise(signal.len(), seed))
            .map(|(s, n)| s + level * n)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_every_method() {
        for method in CorrelationMethod::all() {
            let algorithm = create_algorithm(*method, true);
            assert_eq!(algorithm.name(), method.name());
        }
    }

    #[test]
    fn create_from_name_accepts_keys_and_names() {
        assert_eq!(create_from_name("gcc_phat", true).unwrap().name(), "Phase Correlation (GCC-PHAT)");
        assert_eq!(create_from_name("Onset Detection", false).unwrap().name(), "Onset Detection");
    }

    #[test]
    fn create_from_name_rejects_unknown() {
        let err = create_from_name("xcorr-9000", true).err().unwrap();
        assert!(matches!(err, AnalysisError::UnknownMethod(name) if name == "xcorr-9000"));
    }

    #[test]
    fn every_method_rejects_empty_input() {
        for method in CorrelationMethod::all() {
            let algorithm = create_algorithm(*method, true);
            assert!(algorithm.find_delay(&[], &[0.0; 10], 48000).is_err());
            assert!(algorithm.find_delay(&[0.0; 10], &[0.0; 10], 0).is_err());
        }
    }

    #[test]
    fn confidence_falls_when_target_is_buried_in_noise() {
        use super::test_signals::{delayed, impulse_train, with_noise};

        const SR: u32 = 8000;
        let signal = with_noise(&impulse_train(6 * SR as usize, 4000, 71), 0.01, 72);
        let target = delayed(&signal, 4 * 512);
        let buried = with_noise(&target, 50.0, 73);

        for method in [
            CorrelationMethod::GccScot,
            CorrelationMethod::GccWhiten,
            CorrelationMethod::Onset,
            CorrelationMethod::Dtw,
            CorrelationMethod::Spectrogram,
        ] {
            let algorithm = create_algorithm(method, true);
            let clean = algorithm.find_delay(&signal, &target, SR).unwrap().confidence;
            let noisy = algorithm.find_delay(&signal, &buried, SR).unwrap().confidence;
            assert!(
                noisy < clean,
                "{}: noisy {:.1} not below clean {:.1}",
                method,
                noisy,
                clean
            );
        }
    }

    #[test]
    fn silent_input_yields_bounded_confidence() {
        let silence = vec![0.0f32; 8000];
        for method in CorrelationMethod::all() {
            let algorithm = create_algorithm(*method, true);
            if let Ok(estimate) = algorithm.find_delay(&silence, &silence, 8000) {
                assert!(estimate.delay_ms.is_finite(), "{}", method);
                assert!((0.0..=100.0).contains(&estimate.confidence), "{}", method);
            }
        }
    }
}
