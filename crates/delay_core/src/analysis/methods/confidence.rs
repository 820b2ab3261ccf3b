//! Peak-shape confidence scores for correlation outputs.
//!
//! Both scores combine three ratios measured on the absolute correlation:
//! prominence over the median, uniqueness against the best peak outside a
//! ±1% exclusion zone, and SNR against the spread of the lower 90% of values.

const EPS: f64 = 1e-9;

struct PeakRatios {
    prominence: f64,
    uniqueness: f64,
    snr: f64,
}

fn peak_ratios(abs_corr: &[f64], peak_idx: usize) -> Option<PeakRatios> {
    let peak_value = *abs_corr.get(peak_idx)?;

    let mut sorted = abs_corr.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = sorted[sorted.len() / 2];
    let prominence = peak_value / (median + EPS);

    let exclusion = (abs_corr.len() / 100).max(1);
    let start_mask = peak_idx.saturating_sub(exclusion);
    let end_mask = (peak_idx + exclusion + 1).min(abs_corr.len());
    let second_best = abs_corr
        .iter()
        .enumerate()
        .filter(|(i, _)| *i < start_mask || *i >= end_mask)
        .map(|(_, &v)| v)
        .max_by(|a, b| a.total_cmp(b))
        .unwrap_or(median);
    let uniqueness = peak_value / (second_best + EPS);

    let p90 = sorted
        .get(abs_corr.len() * 90 / 100)
        .copied()
        .unwrap_or(peak_value);
    let background: Vec<f64> = abs_corr.iter().copied().filter(|&x| x < p90).collect();
    let bg_std = if background.len() > 10 {
        let mean = background.iter().sum::<f64>() / background.len() as f64;
        let var = background.iter().map(|x| (x - mean).powi(2)).sum::<f64>()
            / background.len() as f64;
        var.sqrt()
    } else {
        EPS
    };
    let snr = peak_value / (bg_std + EPS);

    Some(PeakRatios {
        prominence,
        uniqueness,
        snr,
    })
}

/// Linear confidence used by the GCC family, clamped to 0-100.
///
/// `(5·prominence + 8·uniqueness + 1.5·snr) / 3`
pub fn normalize_peak_confidence(abs_corr: &[f64], peak_idx: usize) -> f64 {
    match peak_ratios(abs_corr, peak_idx) {
        Some(r) => ((r.prominence * 5.0 + r.uniqueness * 8.0 + r.snr * 1.5) / 3.0).clamp(0.0, 100.0),
        None => 0.0,
    }
}

/// Saturating confidence for feature-envelope correlation.
///
/// Each ratio maps through `100·(1 - 1/(1 + r/scale))`, so a ratio equal to
/// its scale scores 50. Uniqueness counts from 1 because a lone peak ties
/// itself.
pub fn sigmoid_peak_confidence(abs_corr: &[f64], peak_idx: usize) -> f64 {
    fn score(ratio: f64, scale: f64) -> f64 {
        100.0 * (1.0 - 1.0 / (1.0 + ratio.max(0.0) / scale))
    }

    match peak_ratios(abs_corr, peak_idx) {
        Some(r) => (score(r.prominence, 10.0) * 0.25
            + score(r.uniqueness - 1.0, 2.0) * 0.50
            + score(r.snr, 30.0) * 0.25)
            .clamp(0.0, 100.0),
        None => 0.0,
    }
}
