//! Dynamic Time Warping (DTW) correlation method.
//!
//! Aligns MFCC sequences of both chunks with DTW and reports the median
//! frame offset along the warping path. MFCCs are robust to amplitude and
//! timbral differences; the warping absorbs small tempo variations.
//!
//! Resolution is one hop (512 samples).

use parking_lot::Mutex;
use rustfft::FftPlanner;

use super::spectral::{apply_filterbank, dct_ortho, mel_filterbank, stft, Scale, HOP_LENGTH, N_FFT};
use super::xcorr::{samples_to_ms, to_f64};
use super::{validate_input, CorrelationAlgorithm};
use crate::analysis::types::{AnalysisError, AnalysisResult, DelayEstimate};

/// DTW correlator over MFCC features.
pub struct Dtw {
    /// Number of MFCC coefficients to keep.
    n_mfcc: usize,
    /// Number of mel bands.
    n_mels: usize,
    n_fft: usize,
    hop_length: usize,
    planner: Mutex<FftPlanner<f64>>,
}

/// Accumulated cost matrix and the warping path through it.
struct Alignment {
    final_cost: f64,
    path: Vec<(usize, usize)>,
}

impl Dtw {
    /// Create a new DTW correlator.
    ///
    /// Default: n_mfcc=13, n_mels=40, n_fft=2048, hop_length=512
    pub fn new() -> Self {
        Self {
            n_mfcc: 13,
            n_mels: 40,
            n_fft: N_FFT,
            hop_length: HOP_LENGTH,
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    /// MFCC features as `mfcc[frame][coefficient]`.
    fn mfcc(&self, samples: &[f64], sample_rate: u32) -> Vec<Vec<f64>> {
        let power = stft(&self.planner, samples, self.n_fft, self.hop_length, Scale::Power);
        if power.is_empty() {
            return Vec::new();
        }

        let filterbank = mel_filterbank(self.n_mels, self.n_fft, sample_rate);
        apply_filterbank(&power, &filterbank)
            .iter()
            .map(|frame| {
                let log_mel: Vec<f64> = frame.iter().map(|&x| x.max(1e-10).ln()).collect();
                dct_ortho(&log_mel, self.n_mfcc)
            })
            .collect()
    }

    /// Standard DTW with steps (1,0), (0,1) and (1,1).
    fn align(&self, x: &[Vec<f64>], y: &[Vec<f64>]) -> Option<Alignment> {
        let (n, m) = (x.len(), y.len());
        if n == 0 || m == 0 {
            return None;
        }

        let mut d = vec![vec![f64::INFINITY; m]; n];
        d[0][0] = euclidean_distance(&x[0], &y[0]);
        for i in 1..n {
            d[i][0] = d[i - 1][0] + euclidean_distance(&x[i], &y[0]);
        }
        for j in 1..m {
            d[0][j] = d[0][j - 1] + euclidean_distance(&x[0], &y[j]);
        }
        for i in 1..n {
            for j in 1..m {
                let cost = euclidean_distance(&x[i], &y[j]);
                d[i][j] = cost + d[i - 1][j].min(d[i][j - 1]).min(d[i - 1][j - 1]);
            }
        }

        // Backtrack preferring the diagonal on ties.
        let (mut i, mut j) = (n - 1, m - 1);
        let mut path = vec![(i, j)];
        while i > 0 || j > 0 {
            if i == 0 {
                j -= 1;
            } else if j == 0 {
                i -= 1;
            } else {
                let diag = d[i - 1][j - 1];
                let left = d[i][j - 1];
                let up = d[i - 1][j];
                if diag <= left && diag <= up {
                    i -= 1;
                    j -= 1;
                } else if left <= up {
                    j -= 1;
                } else {
                    i -= 1;
                }
            }
            path.push((i, j));
        }
        path.reverse();

        Some(Alignment {
            final_cost: d[n - 1][m - 1],
            path,
        })
    }
}

fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

impl Default for Dtw {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationAlgorithm for Dtw {
    fn name(&self) -> &'static str {
        "DTW (Dynamic Time Warping)"
    }

    fn find_delay(
        &self,
        reference: &[f32],
        target: &[f32],
        sample_rate: u32,
    ) -> AnalysisResult<DelayEstimate> {
        validate_input(reference, target, sample_rate)?;

        let ref_mfcc = self.mfcc(&to_f64(reference), sample_rate);
        let tgt_mfcc = self.mfcc(&to_f64(target), sample_rate);
        let alignment = self.align(&ref_mfcc, &tgt_mfcc).ok_or_else(|| {
            AnalysisError::InvalidAudio("Audio too short for MFCC extraction".to_string())
        })?;

        // Target frame minus reference frame; the median ignores boundary legs.
        let mut offsets: Vec<i64> = alignment
            .path
            .iter()
            .map(|&(r, t)| t as i64 - r as i64)
            .collect();
        offsets.sort_unstable();
        let median_offset = offsets[offsets.len() / 2];

        let avg_cost = alignment.final_cost / alignment.path.len() as f64;
        let confidence = if avg_cost.is_finite() {
            (100.0 - avg_cost * 0.5).clamp(0.0, 100.0)
        } else {
            0.0
        };

        Ok(DelayEstimate {
            delay_ms: samples_to_ms(median_offset as f64 * self.hop_length as f64, sample_rate),
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::methods::test_signals::{delayed, impulse_train, with_noise};

    #[test]
    fn identical_sequences_align_on_the_diagonal() {
        let seq: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64, (i * i) as f64]).collect();
        let alignment = Dtw::new().align(&seq, &seq).unwrap();
        assert_eq!(alignment.final_cost, 0.0);
        assert_eq!(alignment.path, (0..5).map(|i| (i, i)).collect::<Vec<_>>());
    }

    #[test]
    fn dtw_finds_late_target_within_one_hop() {
        let sr = 8000u32;
        let signal = with_noise(&impulse_train(6 * sr as usize, 4000, 61), 0.01, 62);
        let shift = 4 * HOP_LENGTH as isize;
        let target = delayed(&signal, shift);

        let estimate = Dtw::new().find_delay(&signal, &target, sr).unwrap();
        let expected = shift as f64 * 1000.0 / sr as f64;
        let hop_ms = HOP_LENGTH as f64 * 1000.0 / sr as f64;
        assert!(
            (estimate.delay_ms - expected).abs() <= hop_ms,
            "got {} ms, expected {} ms",
            estimate.delay_ms,
            expected
        );
        assert!((0.0..=100.0).contains(&estimate.confidence));
    }

    #[test]
    fn dtw_identical_audio_has_zero_delay() {
        let signal = with_noise(&impulse_train(24000, 3000, 63), 0.01, 64);
        let estimate = Dtw::new().find_delay(&signal, &signal, 8000).unwrap();
        assert_eq!(estimate.delay_ms, 0.0);
        assert_eq!(estimate.confidence, 100.0);
    }
}
