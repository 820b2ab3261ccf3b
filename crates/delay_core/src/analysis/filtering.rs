//! Pre-correlation audio conditioning.
//!
//! Butterworth responses are built from cascaded biquad sections. The
//! dialogue band-pass is a high-pass followed by a low-pass.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, Type, Q_BUTTERWORTH_F64};

use crate::config::FilterSettings;
use crate::models::FilteringMethod;

/// Filter parameters resolved for one sample rate.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub method: FilteringMethod,
    pub sample_rate: u32,
    /// High-pass edge of the band-pass (Hz).
    pub low_cutoff_hz: f64,
    /// Low-pass edge of the band-pass and the low-pass cutoff (Hz).
    pub high_cutoff_hz: f64,
    /// Butterworth order, realized as `ceil(order / 2)` biquad sections.
    pub order: usize,
}

impl FilterConfig {
    pub fn from_settings(settings: &FilterSettings, sample_rate: u32) -> Self {
        Self {
            method: settings.filtering_method,
            sample_rate,
            low_cutoff_hz: settings.filter_low_cutoff_hz,
            high_cutoff_hz: settings.filter_high_cutoff_hz,
            order: settings.filter_order,
        }
    }

    /// Speech band, 300-3400 Hz, order 5.
    pub fn dialogue_bandpass(sample_rate: u32) -> Self {
        Self {
            method: FilteringMethod::DialogueBandPass,
            sample_rate,
            low_cutoff_hz: 300.0,
            high_cutoff_hz: 3400.0,
            order: 5,
        }
    }

    pub fn low_pass(sample_rate: u32, cutoff_hz: f64) -> Self {
        Self {
            method: FilteringMethod::LowPass,
            sample_rate,
            low_cutoff_hz: 0.0,
            high_cutoff_hz: cutoff_hz,
            order: 5,
        }
    }
}

/// Apply the configured filter, returning a new buffer.
///
/// Coefficients that cannot be designed (cutoff at or above Nyquist, zero
/// sample rate) leave the audio unchanged.
pub fn apply_filter(samples: &[f32], config: &FilterConfig) -> Vec<f32> {
    match config.method {
        FilteringMethod::None => samples.to_vec(),
        FilteringMethod::LowPass => run_sections(
            samples,
            &[(Pass::Low, config.high_cutoff_hz, config.order)],
            config.sample_rate,
        ),
        FilteringMethod::DialogueBandPass => {
            let half = (config.order + 1) / 2;
            run_sections(
                samples,
                &[
                    (Pass::High, config.low_cutoff_hz, half),
                    (Pass::Low, config.high_cutoff_hz, half),
                ],
                config.sample_rate,
            )
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    Low,
    High,
}

/// One Butterworth section with its -3 dB point at `cutoff_hz`.
///
/// The cutoff is passed as a fraction of Nyquist; biquad's `from_params`
/// normalizes against twice the sample rate instead.
fn design(pass: Pass, sample_rate: u32, cutoff_hz: f64) -> Option<Coefficients<f64>> {
    if sample_rate == 0 || cutoff_hz <= 0.0 {
        return None;
    }
    let nyquist = sample_rate as f64 / 2.0;
    if cutoff_hz >= nyquist {
        return None;
    }
    let kind = match pass {
        Pass::Low => Type::LowPass,
        Pass::High => Type::HighPass,
    };
    Coefficients::<f64>::from_normalized_params(kind, cutoff_hz / nyquist, Q_BUTTERWORTH_F64).ok()
}

fn run_sections(samples: &[f32], stages: &[(Pass, f64, usize)], sample_rate: u32) -> Vec<f32> {
    let mut designed = Vec::with_capacity(stages.len());
    for (kind, cutoff, order) in stages {
        match design(*kind, sample_rate, *cutoff) {
            Some(coeffs) => designed.push((coeffs, *order)),
            None => {
                tracing::warn!(cutoff, sample_rate, "filter design failed, audio left unfiltered");
                return samples.to_vec();
            }
        }
    }

    let mut work: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    for (coeffs, order) in &designed {
        cascade(&mut work, coeffs, *order);
    }
    work.into_iter().map(|s| s as f32).collect()
}

/// Run `ceil(order / 2)` identical second-order sections in series.
fn cascade(samples: &mut [f64], coeffs: &Coefficients<f64>, order: usize) {
    let sections = ((order + 1) / 2).max(1);
    for _ in 0..sections {
        let mut filter = DirectForm2Transposed::<f64>::new(*coeffs);
        for sample in samples.iter_mut() {
            *sample = filter.run(*sample);
        }
    }
}
