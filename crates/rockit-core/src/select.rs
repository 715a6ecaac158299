use ndarray::ArrayView3;
use rand::rngs::StdRng;
use rand::{thread_rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{
    DEFAULT_NOISE_FRACTION, DEFAULT_SELECTOR_SAMPLE, DEFAULT_WIDTH_FRACTION,
    SELECTOR_MIN_FRAMES, SELECTOR_REFERENCE_PIXELS,
};
use crate::error::{Result, RockitError};
use crate::fit::estimate::{mean, ptp};
use crate::fit::FitMethod;
use crate::volume::{curve_at, VolumeShape};

/// Parameters of the automatic method selection heuristic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Number of curves drawn (without replacement) for the analysis.
    pub sample_size: usize,
    /// Noise above this fraction of the reference amplitude selects `trf`.
    pub noise_fraction: f64,
    /// Mean peak width below this fraction of the frame count selects `dogbox`.
    pub width_fraction: f64,
    /// Side of the top-left pixel block used for the reference amplitude.
    pub reference_pixels: usize,
    /// Seed for reproducible sampling; entropy-seeded when `None`.
    pub seed: Option<u64>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SELECTOR_SAMPLE,
            noise_fraction: DEFAULT_NOISE_FRACTION,
            width_fraction: DEFAULT_WIDTH_FRACTION,
            reference_pixels: SELECTOR_REFERENCE_PIXELS,
            seed: None,
        }
    }
}

/// Statistics gathered from the sampled curves.
#[derive(Clone, Debug, PartialEq)]
pub struct DataCharacteristics {
    /// Number of curves sampled.
    pub sampled: usize,
    /// Mean standard deviation of successive differences.
    pub noise: f64,
    /// Mean number of samples above half of each curve's range.
    pub width: f64,
    /// Mean peak-to-peak amplitude of the reference block.
    pub reference_amplitude: f64,
    /// Number of frames per curve.
    pub frames: usize,
}

impl DataCharacteristics {
    /// Apply the selection policy, in order: noisy, narrow, default.
    pub fn recommend(&self, config: &SelectorConfig) -> FitMethod {
        if self.noise > config.noise_fraction * self.reference_amplitude {
            FitMethod::Trf
        } else if self.width < self.frames as f64 * config.width_fraction {
            FitMethod::Dogbox
        } else {
            FitMethod::Lm
        }
    }
}

/// Sample curves from `data` and measure their noise and peak width.
pub fn analyze_volume(
    data: &ArrayView3<'_, f64>,
    config: &SelectorConfig,
) -> Result<DataCharacteristics> {
    let shape = VolumeShape::of(data);
    let total = shape.pixels();
    if total == 0 || shape.frames == 0 {
        return Err(RockitError::EmptyVolume);
    }

    let amount = config.sample_size.min(total);
    let indices = match config.seed {
        Some(seed) => rand::seq::index::sample(&mut StdRng::seed_from_u64(seed), total, amount),
        None => rand::seq::index::sample(&mut thread_rng(), total, amount),
    };

    let mut noise_levels = Vec::with_capacity(amount);
    let mut widths = Vec::with_capacity(amount);
    let mut curve = Vec::with_capacity(shape.frames);

    for idx in indices.iter() {
        curve.clear();
        curve.extend(curve_at(data, idx).iter().copied());
        if curve.len() <= SELECTOR_MIN_FRAMES {
            continue;
        }
        let diffs: Vec<f64> = curve.windows(2).map(|w| w[1] - w[0]).collect();
        noise_levels.push(std_dev(&diffs));

        let range = ptp(&curve);
        if range > 0.0 {
            let lo = range_min(&curve);
            let above = curve.iter().filter(|&&v| (v - lo) / range > 0.5).count();
            if above > 0 {
                widths.push(above as f64);
            }
        }
    }

    let noise = if noise_levels.is_empty() {
        0.0
    } else {
        mean(&noise_levels)
    };
    let width = if widths.is_empty() {
        shape.frames as f64 / 4.0
    } else {
        mean(&widths)
    };

    let block_rows = config.reference_pixels.min(shape.rows);
    let block_cols = config.reference_pixels.min(shape.cols);
    let mut amplitudes = Vec::with_capacity(block_rows * block_cols);
    for row in 0..block_rows {
        for col in 0..block_cols {
            curve.clear();
            curve.extend(curve_at(data, row * shape.cols + col).iter().copied());
            amplitudes.push(ptp(&curve));
        }
    }

    let characteristics = DataCharacteristics {
        sampled: amount,
        noise,
        width,
        reference_amplitude: mean(&amplitudes),
        frames: shape.frames,
    };
    debug!(
        sampled = characteristics.sampled,
        noise = characteristics.noise,
        width = characteristics.width,
        amplitude = characteristics.reference_amplitude,
        "Analyzed curve characteristics"
    );
    Ok(characteristics)
}

/// Recommend the fitting algorithm for `data`.
///
/// Noisy data gets the robust trust-region method, narrow peaks get the
/// dogleg box method, everything else the unconstrained Levenberg-Marquardt.
pub fn select_optimal_fit_method(
    data: &ArrayView3<'_, f64>,
    config: &SelectorConfig,
) -> Result<FitMethod> {
    Ok(analyze_volume(data, config)?.recommend(config))
}

fn range_min(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_dev_matches_population_formula() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((std_dev(&v) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn policy_checks_noise_before_width() {
        let config = SelectorConfig::default();
        let noisy_and_narrow = DataCharacteristics {
            sampled: 10,
            noise: 50.0,
            width: 1.0,
            reference_amplitude: 100.0,
            frames: 100,
        };
        assert_eq!(noisy_and_narrow.recommend(&config), FitMethod::Trf);

        let narrow = DataCharacteristics {
            noise: 1.0,
            ..noisy_and_narrow.clone()
        };
        assert_eq!(narrow.recommend(&config), FitMethod::Dogbox);

        let wide = DataCharacteristics {
            width: 30.0,
            ..narrow
        };
        assert_eq!(wide.recommend(&config), FitMethod::Lm);
    }
}
