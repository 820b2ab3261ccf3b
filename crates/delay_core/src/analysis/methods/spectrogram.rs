//! Spectrogram Correlation method.
//!
//! Computes mel spectrograms of both signals, averages each frame over the
//! mel bands in dB and correlates the resulting envelopes with GCC-PHAT.
//! Resolution is one hop (512 samples).

use parking_lot::Mutex;
use rustfft::FftPlanner;

use super::spectral::{
    apply_filterbank, envelope_lag, mel_filterbank, stft, zscore, Scale, HOP_LENGTH, N_FFT,
};
use super::xcorr::{samples_to_ms, to_f64};
use super::{validate_input, CorrelationAlgorithm};
use crate::analysis::types::{AnalysisError, AnalysisResult, DelayEstimate};

/// Spectrogram correlator using mel spectrograms.
pub struct Spectrogram {
    n_mels: usize,
    n_fft: usize,
    hop_length: usize,
    planner: Mutex<FftPlanner<f64>>,
}

impl Spectrogram {
    /// Create a new correlator with n_mels=64, n_fft=2048, hop_length=512.
    pub fn new() -> Self {
        Self {
            n_mels: 64,
            n_fft: N_FFT,
            hop_length: HOP_LENGTH,
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    fn mel_envelope(&self, samples: &[f64], sample_rate: u32) -> Vec<f64> {
        let power = stft(&self.planner, samples, self.n_fft, self.hop_length, Scale::Power);
        if power.is_empty() {
            return Vec::new();
        }

        let filterbank = mel_filterbank(self.n_mels, self.n_fft, sample_rate);
        let mut envelope: Vec<f64> = apply_filterbank(&power, &filterbank)
            .iter()
            .map(|frame| {
                frame.iter().map(|&p| power_to_db(p)).sum::<f64>() / frame.len().max(1) as f64
            })
            .collect();

        zscore(&mut envelope);
        envelope
    }
}

fn power_to_db(power: f64) -> f64 {
    10.0 * power.max(1e-10).log10()
}

impl Default for Spectrogram {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationAlgorithm for Spectrogram {
    fn name(&self) -> &'static str {
        "Spectrogram Correlation"
    }

    fn find_delay(
        &self,
        reference: &[f32],
        target: &[f32],
        sample_rate: u32,
    ) -> AnalysisResult<DelayEstimate> {
        validate_input(reference, target, sample_rate)?;

        let ref_envelope = self.mel_envelope(&to_f64(reference), sample_rate);
        let tgt_envelope = self.mel_envelope(&to_f64(target), sample_rate);
        if ref_envelope.is_empty() || tgt_envelope.is_empty() {
            return Err(AnalysisError::InvalidAudio(
                "Audio too short for spectrogram".to_string(),
            ));
        }

        let (lag_frames, confidence) = envelope_lag(&self.planner, &ref_envelope, &tgt_envelope);

        Ok(DelayEstimate {
            delay_ms: samples_to_ms(lag_frames as f64 * self.hop_length as f64, sample_rate),
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::methods::test_signals::{delayed, impulse_train, with_noise};

    #[test]
    fn power_to_db_floors_at_minus_100() {
        assert_eq!(power_to_db(0.0), -100.0);
        assert!((power_to_db(1.0)).abs() < 1e-12);
    }

    #[test]
    fn spectrogram_finds_early_target_within_one_hop() {
        let sr = 8000u32;
        let signal = with_noise(&impulse_train(8 * sr as usize, 4000, 51), 0.01, 52);
        let shift = -(3 * HOP_LENGTH as isize);
        let target = delayed(&signal, shift);

        let estimate = Spectrogram::new().find_delay(&signal, &target, sr).unwrap();
        let expected = shift as f64 * 1000.0 / sr as f64;
        let hop_ms = HOP_LENGTH as f64 * 1000.0 / sr as f64;
        assert!(
            (estimate.delay_ms - expected).abs() <= hop_ms,
            "got {} ms, expected {} ms",
            estimate.delay_ms,
            expected
        );
    }
}
