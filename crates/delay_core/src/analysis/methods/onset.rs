//! Onset Detection correlation method.
//!
//! Detects transients (onsets) in audio using spectral flux and correlates
//! the onset envelopes. Robust to different mixing, EQ and levels because
//! it follows attacks rather than waveform detail.
//!
//! Resolution is one hop (512 samples).

use parking_lot::Mutex;
use rustfft::FftPlanner;

use super::spectral::{envelope_lag, stft, zscore, Scale, HOP_LENGTH, N_FFT};
use super::xcorr::{samples_to_ms, to_f64};
use super::{validate_input, CorrelationAlgorithm};
use crate::analysis::types::{AnalysisError, AnalysisResult, DelayEstimate};

/// Onset detection correlator.
pub struct Onset {
    n_fft: usize,
    hop_length: usize,
    planner: Mutex<FftPlanner<f64>>,
}

impl Onset {
    /// Create a new onset correlator with n_fft=2048, hop_length=512.
    pub fn new() -> Self {
        Self {
            n_fft: N_FFT,
            hop_length: HOP_LENGTH,
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    /// Spectral flux onset strength, z-normalized.
    ///
    /// 1. Magnitude spectrogram
    /// 2. Frame-to-frame difference per bin
    /// 3. Half-wave rectification
    /// 4. Sum across bins
    fn onset_envelope(&self, samples: &[f64]) -> Vec<f64> {
        let frames = stft(&self.planner, samples, self.n_fft, self.hop_length, Scale::Magnitude);
        if frames.len() < 2 {
            return Vec::new();
        }

        let mut envelope = vec![0.0; frames.len()];
        for (i, pair) in frames.windows(2).enumerate() {
            envelope[i + 1] = pair[1]
                .iter()
                .zip(&pair[0])
                .map(|(cur, prev)| (cur - prev).max(0.0))
                .sum();
        }

        zscore(&mut envelope);
        envelope
    }
}

impl Default for Onset {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationAlgorithm for Onset {
    fn name(&self) -> &'static str {
        "Onset Detection"
    }

    fn find_delay(
        &self,
        reference: &[f32],
        target: &[f32],
        sample_rate: u32,
    ) -> AnalysisResult<DelayEstimate> {
        validate_input(reference, target, sample_rate)?;

        let ref_envelope = self.onset_envelope(&to_f64(reference));
        let tgt_envelope = self.onset_envelope(&to_f64(target));
        if ref_envelope.is_empty() || tgt_envelope.is_empty() {
            return Err(AnalysisError::InvalidAudio(
                "Audio too short for onset detection".to_string(),
            ));
        }

        let (lag_frames, confidence) = envelope_lag(&self.planner, &ref_envelope, &tgt_envelope);
        let delay_samples = lag_frames as f64 * self.hop_length as f64;

        Ok(DelayEstimate {
            delay_ms: samples_to_ms(delay_samples, sample_rate),
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::methods::test_signals::{delayed, impulse_train, with_noise};

    const SR: u32 = 8000;

    #[test]
    fn onset_finds_shift_within_one_hop() {
        let signal = with_noise(&impulse_train(8 * SR as usize, 4000, 41), 0.01, 42);
        let shift = 4 * HOP_LENGTH as isize;
        let target = delayed(&signal, shift);

        let estimate = Onset::new().find_delay(&signal, &target, SR).unwrap();
        let expected = shift as f64 * 1000.0 / SR as f64;
        let hop_ms = HOP_LENGTH as f64 * 1000.0 / SR as f64;

        assert!(
            (estimate.delay_ms - expected).abs() <= hop_ms,
            "got {} ms, expected {} ms",
            estimate.delay_ms,
            expected
        );
        assert!((0.0..=100.0).contains(&estimate.confidence));
    }

    #[test]
    fn onset_envelope_has_zero_mean_and_unit_variance() {
        let signal = to_f64(&impulse_train(4 * SR as usize, 3000, 43));
        let envelope = Onset::new().onset_envelope(&signal);
        let n = envelope.len() as f64;
        let mean = envelope.iter().sum::<f64>() / n;
        let var = envelope.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        assert!(mean.abs() < 1e-9, "mean {}", mean);
        assert!((var - 1.0).abs() < 1e-9, "variance {}", var);
    }

    #[test]
    fn onset_rejects_audio_shorter_than_two_frames() {
        let short = vec![0.5f32; N_FFT + 10];
        assert!(Onset::new().find_delay(&short, &short, SR).is_err());
    }
}
