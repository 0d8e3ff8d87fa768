//! Savitzky-Golay smoothing for noisy log channels.
//!
//! Fits a low-order polynomial over a sliding window by linear least
//! squares, which smooths (or differentiates) a sampled signal without
//! shifting its features the way a moving average does.

use nalgebra::DMatrix;

use crate::error::{LogError, LogResult};

/// Applies a Savitzky-Golay filter to `y`.
///
/// * `window_size`: odd number of samples per fit, > `order` + 1.
/// * `order`: polynomial order of the local fit.
/// * `deriv`: derivative to return (0 = smoothed signal).
/// * `rate`: sample rate, scales derivative outputs.
///
/// The signal is padded at both ends with values mirrored about the first
/// and last sample, so the output has the same length as the input.
pub fn savitzky_golay(
    y: &[f64],
    window_size: usize,
    order: usize,
    deriv: usize,
    rate: f64,
) -> LogResult<Vec<f64>> {
    if window_size % 2 != 1 || window_size < 1 {
        return Err(LogError::InvalidFilter {
            what: "window_size (must be a positive odd number)",
            value: window_size,
        });
    }
    if window_size < order + 2 {
        return Err(LogError::InvalidFilter {
            what: "window_size (too small for the polynomial order)",
            value: window_size,
        });
    }
    if deriv > order {
        return Err(LogError::InvalidFilter {
            what: "deriv (exceeds the polynomial order)",
            value: deriv,
        });
    }
    let half_window = (window_size - 1) / 2;
    if y.len() < half_window + 1 {
        return Err(LogError::ShortSignal {
            len: y.len(),
            window: window_size,
        });
    }

    // Least-squares fit of a degree-`order` polynomial over the window:
    // row `deriv` of the design matrix pseudo-inverse gives the
    // convolution coefficients.
    let design = DMatrix::from_fn(window_size, order + 1, |row, col| {
        ((row as f64) - (half_window as f64)).powi(col as i32)
    });
    let pinv = design
        .pseudo_inverse(1e-12)
        .map_err(|reason| LogError::FilterNumerics { reason })?;
    let scale = rate.powi(deriv as i32) * factorial(deriv);
    let weights: Vec<f64> = pinv.row(deriv).iter().map(|w| w * scale).collect();

    // Pad with values mirrored about the end samples.
    let first = y[0];
    let last = y[y.len() - 1];
    let mut padded = Vec::with_capacity(y.len() + 2 * half_window);
    for i in (1..=half_window).rev() {
        padded.push(first - (y[i] - first).abs());
    }
    padded.extend_from_slice(y);
    for i in (y.len() - half_window - 1..y.len() - 1).rev() {
        padded.push(last + (y[i] - last).abs());
    }

    let mut out = Vec::with_capacity(y.len());
    for start in 0..y.len() {
        let mut acc = 0.0;
        for (offset, weight) in weights.iter().enumerate() {
            acc += weight * padded[start + offset];
        }
        out.push(acc);
    }
    Ok(out)
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|v| v as f64).product()
}
