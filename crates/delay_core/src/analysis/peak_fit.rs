//! Peak fitting for sub-sample accuracy.
//!
//! A parabola through the peak and its two neighbours locates the true
//! maximum between samples.

/// Fractional offset of the parabola vertex from the middle point.
///
/// With `a = (y0 + y2)/2 - y1` and `b = (y2 - y0)/2` the vertex sits at
/// `-b / 2a`. Flat curvature gives 0; the result is clamped to ±1.
pub fn parabolic_offset(y0: f64, y1: f64, y2: f64) -> f64 {
    let a = (y0 + y2) / 2.0 - y1;
    let b = (y2 - y0) / 2.0;

    let delta = if a.abs() > 1e-10 { -b / (2.0 * a) } else { 0.0 };
    delta.clamp(-1.0, 1.0)
}

/// Refined position of the peak at `peak_index`.
///
/// Edges have no neighbours and return the discrete index unchanged.
pub fn fit_peak(values: &[f64], peak_index: usize) -> f64 {
    if peak_index == 0 || peak_index + 1 >= values.len() {
        return peak_index as f64;
    }

    let delta = parabolic_offset(
        values[peak_index - 1],
        values[peak_index],
        values[peak_index + 1],
    );
    peak_index as f64 + delta
}

/// Index of the largest value, `None` for an empty slice.
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_fit_on_perfect_parabola() {
        let values: Vec<f64> = (0..11)
            .map(|i| {
                let x = i as f64 - 5.3;
                1.0 - x * x
            })
            .collect();

        let peak = argmax(&values).unwrap();
        let refined = fit_peak(&values, peak);

        assert!((refined - 5.3).abs() < 1e-9, "got {}", refined);
    }

    #[test]
    fn symmetric_peak_has_no_offset() {
        assert!(parabolic_offset(0.8, 1.0, 0.8).abs() < 1e-12);
    }

    #[test]
    fn asymmetric_peak_leans_toward_larger_neighbour() {
        // a = -0.3, b = 0.1 -> delta = 1/6
        let delta = parabolic_offset(0.6, 1.0, 0.8);
        assert!((delta - 1.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn offset_is_zero_when_flat_and_clamped_when_far() {
        assert_eq!(parabolic_offset(1.0, 1.0, 1.0), 0.0);
        assert_eq!(parabolic_offset(0.0, 1.0, 1.5), 1.0);
    }

    #[test]
    fn edges_return_discrete_index() {
        let values = vec![1.0, 0.8, 0.5];
        assert_eq!(fit_peak(&values, 0), 0.0);
        assert_eq!(fit_peak(&values, 2), 2.0);
    }

    #[test]
    fn argmax_of_empty_is_none() {
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[0.1, 0.9, 0.3]), Some(1));
    }
}
