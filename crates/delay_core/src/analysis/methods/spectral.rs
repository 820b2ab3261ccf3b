//! Short-time spectral features for the envelope correlators.
//!
//! Framing follows the librosa defaults used throughout: 2048-point Hann
//! windows every 512 samples, Slaney-normalized mel filters on the
//! `1127·ln(1 + f/700)` scale and an orthonormal DCT-II.

use std::f64::consts::PI;

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, FftPlanner};

use super::confidence::sigmoid_peak_confidence;
use super::xcorr::{circular_correlation, Weighting};
use crate::analysis::peak_fit::argmax;

pub(crate) const N_FFT: usize = 2048;
pub(crate) const HOP_LENGTH: usize = 512;

/// What each STFT bin holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scale {
    Magnitude,
    Power,
}

/// Periodic Hann window.
pub(crate) fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

/// STFT as `frames[frame][bin]` over the non-negative bins.
///
/// Returns no frames when the input is shorter than one window.
pub(crate) fn stft(
    planner: &Mutex<FftPlanner<f64>>,
    samples: &[f64],
    n_fft: usize,
    hop_length: usize,
    scale: Scale,
) -> Vec<Vec<f64>> {
    if samples.len() < n_fft || n_fft == 0 || hop_length == 0 {
        return Vec::new();
    }

    let window = hann_window(n_fft);
    let num_bins = n_fft / 2 + 1;
    let fft = planner.lock().plan_fft_forward(n_fft);

    (0..=samples.len() - n_fft)
        .step_by(hop_length)
        .map(|start| {
            let mut buffer: Vec<Complex<f64>> = samples[start..start + n_fft]
                .iter()
                .zip(window.iter())
                .map(|(&s, &w)| Complex::new(s * w, 0.0))
                .collect();
            fft.process(&mut buffer);

            buffer[..num_bins]
                .iter()
                .map(|c| match scale {
                    Scale::Magnitude => c.norm(),
                    Scale::Power => c.norm_sqr(),
                })
                .collect()
        })
        .collect()
}

pub(crate) fn hz_to_mel(hz: f64) -> f64 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

pub(crate) fn mel_to_hz(mel: f64) -> f64 {
    700.0 * ((mel / 1127.0).exp() - 1.0)
}

/// Triangular mel filters spanning 0 Hz to Nyquist, shape `[n_mels][n_fft/2 + 1]`.
pub(crate) fn mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: u32) -> Vec<Vec<f64>> {
    let n_bins = n_fft / 2 + 1;
    let mel_max = hz_to_mel(sample_rate as f64 / 2.0);

    let hz_points: Vec<f64> = (0..=n_mels + 1)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();
    let bin_points: Vec<f64> = hz_points
        .iter()
        .map(|&hz| hz * n_fft as f64 / sample_rate as f64)
        .collect();

    (0..n_mels)
        .map(|i| {
            let (start, center, end) = (bin_points[i], bin_points[i + 1], bin_points[i + 2]);
            let bandwidth = hz_points[i + 2] - hz_points[i];
            let norm = if bandwidth > 0.0 { 2.0 / bandwidth } else { 1.0 };

            (0..n_bins)
                .map(|j| {
                    let bin = j as f64;
                    let weight = if bin >= start && bin < center {
                        (bin - start) / (center - start)
                    } else if bin >= center && bin <= end && end > center {
                        (end - bin) / (end - center)
                    } else {
                        0.0
                    };
                    weight * norm
                })
                .collect()
        })
        .collect()
}

/// Project each spectrum frame onto the filterbank.
pub(crate) fn apply_filterbank(frames: &[Vec<f64>], filterbank: &[Vec<f64>]) -> Vec<Vec<f64>> {
    frames
        .iter()
        .map(|frame| {
            filterbank
                .iter()
                .map(|filter| frame.iter().zip(filter).map(|(s, f)| s * f).sum::<f64>())
                .collect()
        })
        .collect()
}

/// First `n_coeffs` orthonormal DCT-II coefficients.
pub(crate) fn dct_ortho(values: &[f64], n_coeffs: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return vec![0.0; n_coeffs];
    }
    let nf = n as f64;

    (0..n_coeffs)
        .map(|k| {
            let sum: f64 = values
                .iter()
                .enumerate()
                .map(|(i, &v)| v * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * nf)).cos())
                .sum();
            let norm = if k == 0 { (1.0 / nf).sqrt() } else { (2.0 / nf).sqrt() };
            sum * norm
        })
        .collect()
}

/// PHAT-correlate two frame envelopes.
///
/// Returns the target lag in frames (positive when late) and a sigmoid
/// confidence from the peak shape.
pub(crate) fn envelope_lag(
    planner: &Mutex<FftPlanner<f64>>,
    reference: &[f64],
    target: &[f64],
) -> (isize, f64) {
    if reference.is_empty() || target.is_empty() {
        return (0, 0.0);
    }

    let fft_len = (reference.len() + target.len() - 1).next_power_of_two();
    let correlation: Vec<f64> =
        circular_correlation(planner, reference, target, Weighting::Phat, fft_len)
            .into_iter()
            .map(f64::abs)
            .collect();

    let Some(peak_idx) = argmax(&correlation) else {
        return (0, 0.0);
    };
    let lag = if peak_idx > fft_len / 2 {
        peak_idx as isize - fft_len as isize
    } else {
        peak_idx as isize
    };

    (-lag, sigmoid_peak_confidence(&correlation, peak_idx))
}

/// Remove the mean, and scale to unit variance when the envelope varies.
pub(crate) fn zscore(values: &mut [f64]) {
    if values.is_empty() {
        return;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
    let divisor = if std > 1e-10 { std } else { 1.0 };
    for v in values.iter_mut() {
        *v = (*v - mean) / divisor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_count_follows_hop() {
        let planner = Mutex::new(FftPlanner::new());
        let samples = vec![0.1; N_FFT + 3 * HOP_LENGTH + 7];
        let frames = stft(&planner, &samples, N_FFT, HOP_LENGTH, Scale::Power);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].len(), N_FFT / 2 + 1);

        assert!(stft(&planner, &samples[..N_FFT - 1], N_FFT, HOP_LENGTH, Scale::Power).is_empty());
    }

    #[test]
    fn mel_scale_round_trips() {
        for hz in [0.0, 440.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn filterbank_shape_and_positivity() {
        let bank = mel_filterbank(40, N_FFT, 16000);
        assert_eq!(bank.len(), 40);
        assert!(bank.iter().all(|f| f.len() == N_FFT / 2 + 1));
        assert!(bank.iter().all(|f| f.iter().any(|&w| w > 0.0)));
        assert!(bank.iter().flatten().all(|&w| w >= 0.0));
    }

    #[test]
    fn dct_of_constant_is_dc_only() {
        let coeffs = dct_ortho(&[2.0; 8], 4);
        assert!((coeffs[0] - 2.0 * 8f64.sqrt()).abs() < 1e-9);
        assert!(coeffs[1..].iter().all(|c| c.abs() < 1e-9));
    }

    #[test]
    fn envelope_lag_detects_late_target() {
        let planner = Mutex::new(FftPlanner::new());
        let reference: Vec<f64> = crate::analysis::methods::test_signals::noise(64, 5)
            .into_iter()
            .map(f64::from)
            .collect();
        let mut target = vec![0.0; 3];
        target.extend_from_slice(&reference[..61]);

        let (lag, confidence) = envelope_lag(&planner, &reference, &target);
        assert_eq!(lag, 3);
        assert!((0.0..=100.0).contains(&confidence));
    }

    #[test]
    fn zscore_leaves_flat_input_at_zero() {
        let mut flat = vec![-100.0; 6];
        zscore(&mut flat);
        assert!(flat.iter().all(|v| *v == 0.0));
    }
}
