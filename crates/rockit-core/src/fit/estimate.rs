use crate::consts::FWHM_FACTOR;

use super::model::{span, Gaussian1D, Gaussian2D, PeakModel};

/// Peak-to-peak range of a curve.
pub fn ptp(y: &[f64]) -> f64 {
    let (lo, hi) = span(y);
    if y.is_empty() {
        0.0
    } else {
        hi - lo
    }
}

pub fn mean(y: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    y.iter().sum::<f64>() / y.len() as f64
}

/// Index of the first maximum sample.
pub fn argmax(y: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in y.iter().enumerate() {
        if v > y[best] {
            best = i;
        }
    }
    best
}

/// Full width at half maximum measured directly on the samples.
///
/// Walks outward from `peak` until the curve drops below `half`, linearly
/// interpolating the crossing positions. A side that never crosses falls
/// back to the last sample on that side; `None` when the result is not a
/// positive width.
pub fn fwhm_scan(x: &[f64], y: &[f64], peak: usize, half: f64) -> Option<f64> {
    let n = y.len();
    if n < 2 || peak >= n {
        return None;
    }

    let mut left = x[0];
    let mut i = peak;
    while i > 0 {
        if y[i - 1] < half {
            left = interpolate(x[i - 1], y[i - 1], x[i], y[i], half);
            break;
        }
        i -= 1;
    }

    let mut right = x[n - 1];
    let mut i = peak;
    while i + 1 < n {
        if y[i + 1] < half {
            right = interpolate(x[i], y[i], x[i + 1], y[i + 1], half);
            break;
        }
        i += 1;
    }

    let width = (right - left).abs();
    (width > 0.0 && width.is_finite()).then_some(width)
}

fn interpolate(x0: f64, y0: f64, x1: f64, y1: f64, level: f64) -> f64 {
    let dy = y1 - y0;
    if dy.abs() < f64::EPSILON {
        return 0.5 * (x0 + x1);
    }
    x0 + (level - y0) * (x1 - x0) / dy
}

/// `(center, sigma)` of a 1D profile, using the coordinate of its maximum
/// and the half-maximum width of its samples.
fn profile_center_sigma(x: &[f64], y: &[f64]) -> (f64, f64) {
    let peak = argmax(y);
    let (lo, hi) = span(y);
    let half = lo + 0.5 * (hi - lo);
    let (xlo, xhi) = span(x);
    let fallback = ((xhi - xlo) / 4.0).max(f64::EPSILON.sqrt());
    let sigma = fwhm_scan(x, y, peak, half)
        .map(|w| w / FWHM_FACTOR)
        .unwrap_or(fallback);
    (x[peak], sigma)
}

/// Initial `[amplitude, center, sigma, background]` for a 1D curve.
pub fn estimate_1d(model: &Gaussian1D, y: &[f64]) -> Vec<f64> {
    let (lo, hi) = span(y);
    let (center, sigma) = profile_center_sigma(model.x(), y);
    vec![hi - lo, center, sigma, lo]
}

/// Initial 2D parameters, estimating each axis independently on the grid
/// row and column through the brightest frame. Correlation starts at zero.
pub fn estimate_2d(model: &Gaussian2D, y: &[f64]) -> Vec<f64> {
    let (rows, cols) = model.shape();
    let (lo, hi) = span(y);
    let peak = argmax(y);
    let (peak_row, peak_col) = (peak / cols, peak % cols);

    let row: Vec<usize> = (0..cols).map(|c| peak_row * cols + c).collect();
    let col: Vec<usize> = (0..rows).map(|r| r * cols + peak_col).collect();

    let mut center = [model.x()[peak], model.y()[peak]];
    let (xlo, xhi) = span(model.x());
    let (ylo, yhi) = span(model.y());
    let mut sigma = [
        ((xhi - xlo) / 4.0).max(f64::EPSILON.sqrt()),
        ((yhi - ylo) / 4.0).max(f64::EPSILON.sqrt()),
    ];

    // Pair each grid line with whichever coordinate actually varies along it.
    for line in [row, col] {
        if line.len() < 2 {
            continue;
        }
        let xs: Vec<f64> = line.iter().map(|&i| model.x()[i]).collect();
        let ys: Vec<f64> = line.iter().map(|&i| model.y()[i]).collect();
        let values: Vec<f64> = line.iter().map(|&i| y[i]).collect();
        let (axis, coords) = if spread(&xs) >= spread(&ys) {
            (0, xs)
        } else {
            (1, ys)
        };
        if spread(&coords) == 0.0 {
            continue;
        }
        let (c, s) = profile_center_sigma(&coords, &values);
        center[axis] = c;
        sigma[axis] = s;
    }

    vec![hi - lo, center[0], center[1], sigma[0], sigma[1], 0.0, lo]
}

fn spread(values: &[f64]) -> f64 {
    let (lo, hi) = span(values);
    hi - lo
}

/// Initial internal parameters for any model.
pub fn initial_estimate(model: &PeakModel, y: &[f64]) -> Vec<f64> {
    match model {
        PeakModel::Gaussian1D(m) => estimate_1d(m, y),
        PeakModel::Gaussian2D(m) => estimate_2d(m, y),
    }
}

/// Parameters describing a flat background at the curve mean.
pub fn flat_estimate(model: &PeakModel, y: &[f64]) -> Vec<f64> {
    let background = mean(y);
    let peak = argmax(y);
    let at = |values: &[f64]| values.get(peak).copied().unwrap_or(0.0);
    match model {
        PeakModel::Gaussian1D(m) => vec![0.0, at(m.x()), 0.0, background],
        PeakModel::Gaussian2D(m) => vec![0.0, at(m.x()), at(m.y()), 0.0, 0.0, 0.0, background],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fwhm_scan_on_sampled_gaussian() {
        let x: Vec<f64> = (0..201).map(|i| i as f64 * 0.05).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&v| (-0.5 * ((v - 5.0) / 1.0f64).powi(2)).exp())
            .collect();
        let peak = argmax(&y);
        let width = fwhm_scan(&x, &y, peak, 0.5).unwrap();
        assert!((width - FWHM_FACTOR).abs() < 0.01, "width = {width}");
    }

    #[test]
    fn fwhm_scan_rejects_single_sample() {
        assert!(fwhm_scan(&[1.0], &[3.0], 0, 1.5).is_none());
    }

    #[test]
    fn estimate_1d_picks_peak_and_floor() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&v| 100.0 * (-0.5 * ((v - 20.0) / 3.0f64).powi(2)).exp() + 7.0)
            .collect();
        let p = estimate_1d(&Gaussian1D::new(x), &y);
        assert!((p[0] - 100.0).abs() < 1.0);
        assert_eq!(p[1], 20.0);
        assert!((p[2] - 3.0).abs() < 0.3);
        assert!((p[3] - 7.0).abs() < 0.1);
    }

    #[test]
    fn flat_estimate_uses_mean_background() {
        let model = PeakModel::Gaussian1D(Gaussian1D::new(vec![0.0, 1.0, 2.0]));
        let p = flat_estimate(&model, &[1.0, 2.0, 3.0]);
        assert_eq!(p[0], 0.0);
        assert!((p[3] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn flat_estimate_of_empty_curve_is_zero() {
        let model = PeakModel::Gaussian1D(Gaussian1D::new(Vec::new()));
        assert_eq!(flat_estimate(&model, &[]), vec![0.0; 4]);
    }
}
