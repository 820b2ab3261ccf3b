//! FFT cross-correlation shared by the waveform and envelope correlators.

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, FftPlanner};

use super::confidence::normalize_peak_confidence;
use crate::analysis::peak_fit::{argmax, fit_peak};
use crate::analysis::types::{AnalysisError, AnalysisResult, DelayEstimate};

const EPS: f64 = 1e-9;

/// Frequency weighting applied to the cross-power spectrum `R·conj(T)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Weighting {
    /// Plain cross-correlation.
    None,
    /// Divide by `|R·conj(T)|`, keeping phase only.
    Phat,
    /// Divide by the geometric mean of the auto-power spectra.
    Scot,
    /// Normalize `R` and `T` to unit magnitude before multiplying.
    Whiten,
}

pub(crate) fn to_f64(samples: &[f32]) -> Vec<f64> {
    samples.iter().map(|&s| s as f64).collect()
}

/// Subtract the mean and scale to unit variance (flat signals stay zero).
pub(crate) fn standardize(samples: &mut [f64]) {
    if samples.is_empty() {
        return;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let std = (samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
    for s in samples.iter_mut() {
        *s = (*s - mean) / (std + EPS);
    }
}

/// Cross-correlation with zero lag moved to the centre of the output.
///
/// Both inputs are zero-padded to the next power of two at or above
/// `len(reference) + len(target) - 1`. Output index `i` corresponds to lag
/// `i - len/2`; a target lagging by `d` samples peaks at lag `-d`.
pub(crate) fn cross_correlate(
    planner: &Mutex<FftPlanner<f64>>,
    reference: &[f64],
    target: &[f64],
    weighting: Weighting,
) -> Vec<f64> {
    let fft_len = (reference.len() + target.len()).saturating_sub(1).max(1).next_power_of_two();
    let raw = circular_correlation(planner, reference, target, weighting, fft_len);

    let half = fft_len / 2;
    let mut centered = vec![0.0; fft_len];
    for (i, value) in raw.into_iter().enumerate() {
        centered[(i + half) % fft_len] = value;
    }
    centered
}

/// Cross-correlation in FFT order (zero lag at index 0, negative lags wrapped).
pub(crate) fn circular_correlation(
    planner: &Mutex<FftPlanner<f64>>,
    reference: &[f64],
    target: &[f64],
    weighting: Weighting,
    fft_len: usize,
) -> Vec<f64> {
    let (fft, ifft) = {
        let mut planner = planner.lock();
        (
            planner.plan_fft_forward(fft_len),
            planner.plan_fft_inverse(fft_len),
        )
    };

    let mut ref_spec = padded(reference, fft_len);
    let mut tgt_spec = padded(target, fft_len);
    fft.process(&mut ref_spec);
    fft.process(&mut tgt_spec);

    if weighting == Weighting::Whiten {
        for bin in ref_spec.iter_mut().chain(tgt_spec.iter_mut()) {
            let norm = bin.norm() + EPS;
            *bin /= norm;
        }
    }

    let mut cross: Vec<Complex<f64>> = ref_spec
        .iter()
        .zip(tgt_spec.iter())
        .map(|(r, t)| {
            let g = r * t.conj();
            match weighting {
                Weighting::Phat => g / (g.norm() + EPS),
                Weighting::Scot => g / ((r.norm_sqr() * t.norm_sqr()).sqrt() + EPS),
                Weighting::None | Weighting::Whiten => g,
            }
        })
        .collect();

    ifft.process(&mut cross);

    let scale = 1.0 / fft_len as f64;
    cross.iter().map(|c| c.re * scale).collect()
}

fn padded(samples: &[f64], fft_len: usize) -> Vec<Complex<f64>> {
    let mut buffer: Vec<Complex<f64>> = samples.iter().map(|&x| Complex::new(x, 0.0)).collect();
    buffer.resize(fft_len, Complex::new(0.0, 0.0));
    buffer
}

/// Peak of a centred correlation.
pub(crate) struct CenteredPeak {
    /// Absolute correlation values.
    pub abs_corr: Vec<f64>,
    pub index: usize,
    /// Target lag in samples, positive when the target is late.
    pub delay_samples: f64,
}

/// Pick the `|correlation|` maximum and convert it to a delay.
pub(crate) fn centered_peak(correlation: &[f64], refine: bool) -> Option<CenteredPeak> {
    let abs_corr: Vec<f64> = correlation.iter().map(|x| x.abs()).collect();
    let index = argmax(&abs_corr)?;
    let position = if refine {
        fit_peak(&abs_corr, index)
    } else {
        index as f64
    };
    let center = (abs_corr.len() / 2) as f64;
    Some(CenteredPeak {
        delay_samples: -(position - center),
        abs_corr,
        index,
    })
}

/// Weighted GCC estimate scored with `normalize_peak_confidence`.
pub(crate) fn gcc_estimate(
    planner: &Mutex<FftPlanner<f64>>,
    reference: &[f32],
    target: &[f32],
    sample_rate: u32,
    weighting: Weighting,
    peak_fit: bool,
) -> AnalysisResult<DelayEstimate> {
    let correlation = cross_correlate(planner, &to_f64(reference), &to_f64(target), weighting);
    let peak = centered_peak(&correlation, peak_fit)
        .ok_or_else(|| AnalysisError::InvalidAudio("Empty correlation".to_string()))?;

    Ok(DelayEstimate {
        delay_ms: samples_to_ms(peak.delay_samples, sample_rate),
        confidence: normalize_peak_confidence(&peak.abs_corr, peak.index),
    })
}

pub(crate) fn samples_to_ms(samples: f64, sample_rate: u32) -> f64 {
    samples * 1000.0 / sample_rate.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> Mutex<FftPlanner<f64>> {
        Mutex::new(FftPlanner::new())
    }

    fn pulse(len: usize, at: usize) -> Vec<f64> {
        let mut v = vec![0.0; len];
        v[at] = 1.0;
        v
    }

    #[test]
    fn late_target_gives_positive_delay() {
        let reference = pulse(64, 10);
        let target = pulse(64, 17);
        for weighting in [Weighting::None, Weighting::Phat, Weighting::Scot, Weighting::Whiten] {
            let corr = cross_correlate(&planner(), &reference, &target, weighting);
            assert_eq!(corr.len(), 128);
            let peak = centered_peak(&corr, false).unwrap();
            assert_eq!(peak.delay_samples, 7.0, "{:?}", weighting);
        }
    }

    #[test]
    fn early_target_gives_negative_delay() {
        let reference = pulse(50, 30);
        let target = pulse(40, 5);
        let corr = cross_correlate(&planner(), &reference, &target, Weighting::Phat);
        let peak = centered_peak(&corr, false).unwrap();
        assert_eq!(peak.delay_samples, -25.0);
    }

    #[test]
    fn standardize_produces_unit_variance() {
        let mut values = vec![1.0, 2.0, 3.0, 4.0];
        standardize(&mut values);
        let mean: f64 = values.iter().sum::<f64>() / 4.0;
        let var: f64 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-6);

        let mut flat = vec![3.0; 5];
        standardize(&mut flat);
        assert!(flat.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn empty_correlation_has_no_peak() {
        assert!(centered_peak(&[], true).is_none());
    }
}
