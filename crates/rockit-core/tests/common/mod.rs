#![allow(dead_code)]

use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rockit_core::consts::SER_HEADER_SIZE;

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

/// `amp * exp(-0.5 * ((x - center) / sigma)^2) + bg` at every `x`.
pub fn gaussian_1d(x: &[f64], amp: f64, center: f64, sigma: f64, bg: f64) -> Vec<f64> {
    x.iter()
        .map(|&v| amp * (-0.5 * ((v - center) / sigma).powi(2)).exp() + bg)
        .collect()
}

/// Bivariate Gaussian with Pearson correlation `rho`, sampled at paired
/// per-frame coordinates.
#[allow(clippy::too_many_arguments)]
pub fn gaussian_2d(
    x: &[f64],
    y: &[f64],
    amp: f64,
    cx: f64,
    cy: f64,
    sx: f64,
    sy: f64,
    rho: f64,
    bg: f64,
) -> Vec<f64> {
    x.iter()
        .zip(y)
        .map(|(&xv, &yv)| {
            let dx = (xv - cx) / sx;
            let dy = (yv - cy) / sy;
            let q = (dx * dx + dy * dy - 2.0 * rho * dx * dy) / (1.0 - rho * rho);
            amp * (-0.5 * q).exp() + bg
        })
        .collect()
}

/// Volume whose pixel `(row, col)` holds the curve returned by `curve`.
pub fn volume_from_fn<F>(frames: usize, rows: usize, cols: usize, mut curve: F) -> Array3<f64>
where
    F: FnMut(usize, usize) -> Vec<f64>,
{
    let mut volume = Array3::zeros((frames, rows, cols));
    for row in 0..rows {
        for col in 0..cols {
            let values = curve(row, col);
            assert_eq!(values.len(), frames);
            for (f, v) in values.into_iter().enumerate() {
                volume[[f, row, col]] = v;
            }
        }
    }
    volume
}

/// Gaussian peaks whose center and amplitude drift across the image, with
/// every seventh pixel left flat.
pub fn drifting_peaks(x: &[f64], rows: usize, cols: usize) -> Array3<f64> {
    volume_from_fn(x.len(), rows, cols, |row, col| {
        if (row * cols + col) % 7 == 3 {
            return vec![20.0; x.len()];
        }
        let amp = 60.0 + 3.0 * row as f64;
        let center = 4.0 + 0.05 * col as f64;
        let sigma = 1.0 + 0.02 * row as f64;
        gaussian_1d(x, amp, center, sigma, 8.0)
    })
}

/// Add uniform noise with standard deviation `std` (reproducible by `seed`).
pub fn add_uniform_noise(volume: &mut Array3<f64>, std: f64, seed: u64) {
    let half_width = std * 3f64.sqrt();
    let mut rng = StdRng::seed_from_u64(seed);
    for v in volume.iter_mut() {
        *v += rng.gen_range(-half_width..half_width);
    }
}

/// Relative error `|got - want| / |want|`.
pub fn rel_err(got: f64, want: f64) -> f64 {
    (got - want).abs() / want.abs()
}

/// Build a SER file header for mono frames.
pub fn build_ser_header(
    width: u32,
    height: u32,
    bit_depth: u32,
    num_frames: usize,
    color_id: i32,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SER_HEADER_SIZE);

    // Magic (14 bytes)
    buf.extend_from_slice(b"LUCAM-RECORDER");
    // LuID
    buf.extend_from_slice(&0i32.to_le_bytes());
    // ColorID
    buf.extend_from_slice(&color_id.to_le_bytes());
    // LittleEndian = 0
    buf.extend_from_slice(&0i32.to_le_bytes());
    buf.extend_from_slice(&(width as i32).to_le_bytes());
    buf.extend_from_slice(&(height as i32).to_le_bytes());
    buf.extend_from_slice(&(bit_depth as i32).to_le_bytes());
    buf.extend_from_slice(&(num_frames as i32).to_le_bytes());
    // Observer
    let mut observer = [0u8; 40];
    observer[..8].copy_from_slice(b"Beamline");
    buf.extend_from_slice(&observer);
    // Instrument, Telescope
    buf.extend_from_slice(&[0u8; 40]);
    buf.extend_from_slice(&[0u8; 40]);
    // DateTime, DateTimeUTC
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());

    assert_eq!(buf.len(), SER_HEADER_SIZE);
    buf
}

/// Complete mono 8-bit SER file with the given frames.
pub fn build_ser_8bit(width: u32, height: u32, frames: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = build_ser_header(width, height, 8, frames.len(), 0);
    for frame in frames {
        buf.extend_from_slice(frame);
    }
    buf
}

/// Write bytes to a temporary file that lives as long as the handle.
pub fn write_temp(data: &[u8]) -> tempfile::NamedTempFile {
    use std::io::Write;
    let mut f = tempfile::NamedTempFile::new().expect("create temp file");
    f.write_all(data).expect("write data");
    f.flush().expect("flush");
    f
}
