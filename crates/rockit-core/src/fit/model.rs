//! Gaussian peak models evaluated at a curve's coordinates.
//!
//! Internally both models are parameterized by sigma; the parameter vectors
//! handed to callers report widths as FWHM (`FWHM_FACTOR * sigma`).
//!
//! 1D: `[amplitude, center, sigma, background]`
//!
//! 2D: `[amplitude, center_x, center_y, sigma_x, sigma_y, correlation, background]`,
//! where `correlation` is the Pearson coefficient of the bivariate normal
//! (positive when the peak's major axis rises with both x and y).

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::consts::{FWHM_FACTOR, MAX_CORRELATION, MIN_SIGMA_FRACTION, PARAMS_1D, PARAMS_2D};
use crate::error::Result;
use crate::volume::Coordinates;

/// Which peak model a run fits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    Gaussian1D,
    Gaussian2D,
}

impl ModelKind {
    pub fn n_params(&self) -> usize {
        match self {
            Self::Gaussian1D => PARAMS_1D,
            Self::Gaussian2D => PARAMS_2D,
        }
    }

    /// Display names of the reported parameters, in vector order.
    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            Self::Gaussian1D => &["Amplitude", "Peak position", "FWHM", "Background"],
            Self::Gaussian2D => &[
                "Amplitude",
                "Peak position x",
                "Peak position y",
                "FWHM x",
                "FWHM y",
                "Correlation",
                "Background",
            ],
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gaussian1D => write!(f, "Gaussian 1D"),
            Self::Gaussian2D => write!(f, "Gaussian 2D"),
        }
    }
}

/// Box constraints on internal parameters. Infinite entries are unbounded.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    pub fn contains(&self, params: &[f64]) -> bool {
        params
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .all(|(&p, (&lo, &hi))| p >= lo && p <= hi)
    }

    pub fn clip(&self, params: &mut [f64]) {
        for (p, (&lo, &hi)) in params.iter_mut().zip(self.lower.iter().zip(&self.upper)) {
            *p = p.clamp(lo, hi);
        }
    }

    /// Move every parameter strictly inside its bounds.
    pub fn make_strictly_feasible(&self, params: &mut [f64], rstep: f64) {
        for (p, (&lo, &hi)) in params.iter_mut().zip(self.lower.iter().zip(&self.upper)) {
            if *p <= lo {
                *p = lo + rstep * lo.abs().max(1.0);
            }
            if *p >= hi {
                *p = hi - rstep * hi.abs().max(1.0);
            }
            if *p <= lo || *p >= hi {
                *p = 0.5 * (lo + hi);
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct Gaussian1D {
    x: Vec<f64>,
}

impl Gaussian1D {
    pub fn new(x: Vec<f64>) -> Self {
        Self { x }
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    fn evaluate(&self, p: &[f64], out: &mut [f64]) {
        let (a, c, s, bg) = (p[0], p[1], p[2], p[3]);
        for (o, &x) in out.iter_mut().zip(&self.x) {
            let u = (x - c) / s;
            *o = a * (-0.5 * u * u).exp() + bg;
        }
    }

    fn jacobian(&self, p: &[f64], jac: &mut DMatrix<f64>) {
        let (a, c, s) = (p[0], p[1], p[2]);
        for (i, &x) in self.x.iter().enumerate() {
            let u = (x - c) / s;
            let e = (-0.5 * u * u).exp();
            jac[(i, 0)] = e;
            jac[(i, 1)] = a * e * u / s;
            jac[(i, 2)] = a * e * u * u / s;
            jac[(i, 3)] = 1.0;
        }
    }

    fn bounds(&self) -> Bounds {
        let (lo, hi) = span(&self.x);
        let width = (hi - lo).max(1.0);
        Bounds {
            lower: vec![0.0, lo - width, width * MIN_SIGMA_FRACTION, f64::NEG_INFINITY],
            upper: vec![f64::INFINITY, hi + width, f64::INFINITY, f64::INFINITY],
        }
    }
}

#[derive(Clone, Debug)]
pub struct Gaussian2D {
    x: Vec<f64>,
    y: Vec<f64>,
    shape: (usize, usize),
}

impl Gaussian2D {
    pub fn new(x: Vec<f64>, y: Vec<f64>, shape: (usize, usize)) -> Self {
        Self { x, y, shape }
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    fn evaluate(&self, p: &[f64], out: &mut [f64]) {
        let (a, cx, cy, sx, sy, rho, bg) = (p[0], p[1], p[2], p[3], p[4], p[5], p[6]);
        let d = 1.0 - rho * rho;
        if d <= 0.0 {
            out.fill(f64::NAN);
            return;
        }
        for (o, (&x, &y)) in out.iter_mut().zip(self.x.iter().zip(&self.y)) {
            let dx = (x - cx) / sx;
            let dy = (y - cy) / sy;
            let q = (dx * dx + dy * dy - 2.0 * rho * dx * dy) / d;
            *o = a * (-0.5 * q).exp() + bg;
        }
    }

    fn jacobian(&self, p: &[f64], jac: &mut DMatrix<f64>) {
        let (a, cx, cy, sx, sy, rho) = (p[0], p[1], p[2], p[3], p[4], p[5]);
        let d = 1.0 - rho * rho;
        for (i, (&x, &y)) in self.x.iter().zip(&self.y).enumerate() {
            let dx = (x - cx) / sx;
            let dy = (y - cy) / sy;
            let n = dx * dx + dy * dy - 2.0 * rho * dx * dy;
            let e = (-0.5 * n / d).exp();
            let ae = a * e;
            jac[(i, 0)] = e;
            jac[(i, 1)] = ae * (dx - rho * dy) / (sx * d);
            jac[(i, 2)] = ae * (dy - rho * dx) / (sy * d);
            jac[(i, 3)] = ae * dx * (dx - rho * dy) / (sx * d);
            jac[(i, 4)] = ae * dy * (dy - rho * dx) / (sy * d);
            jac[(i, 5)] = ae * (dx * dy * d - rho * n) / (d * d);
            jac[(i, 6)] = 1.0;
        }
    }

    fn bounds(&self) -> Bounds {
        let (xlo, xhi) = span(&self.x);
        let (ylo, yhi) = span(&self.y);
        let wx = (xhi - xlo).max(1.0);
        let wy = (yhi - ylo).max(1.0);
        Bounds {
            lower: vec![
                0.0,
                xlo - wx,
                ylo - wy,
                wx * MIN_SIGMA_FRACTION,
                wy * MIN_SIGMA_FRACTION,
                -MAX_CORRELATION,
                f64::NEG_INFINITY,
            ],
            upper: vec![
                f64::INFINITY,
                xhi + wx,
                yhi + wy,
                f64::INFINITY,
                f64::INFINITY,
                MAX_CORRELATION,
                f64::INFINITY,
            ],
        }
    }
}

/// A peak model bound to the coordinates of one run.
#[derive(Clone, Debug)]
pub enum PeakModel {
    Gaussian1D(Gaussian1D),
    Gaussian2D(Gaussian2D),
}

impl PeakModel {
    /// Build the model for `frames`-sample curves described by `coords`.
    pub fn for_coordinates(coords: &Coordinates, frames: usize) -> Result<Self> {
        coords.validate(frames)?;
        Ok(match coords {
            Coordinates::FrameIndex | Coordinates::Axis(_) => {
                Self::Gaussian1D(Gaussian1D::new(coords.axis_values(frames)))
            }
            Coordinates::Grid { x, y, shape } => {
                Self::Gaussian2D(Gaussian2D::new(x.clone(), y.clone(), *shape))
            }
        })
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Gaussian1D(_) => ModelKind::Gaussian1D,
            Self::Gaussian2D(_) => ModelKind::Gaussian2D,
        }
    }

    pub fn n_params(&self) -> usize {
        self.kind().n_params()
    }

    /// Number of samples in each curve.
    pub fn n_samples(&self) -> usize {
        match self {
            Self::Gaussian1D(m) => m.x.len(),
            Self::Gaussian2D(m) => m.x.len(),
        }
    }

    pub fn evaluate(&self, params: &[f64], out: &mut [f64]) {
        match self {
            Self::Gaussian1D(m) => m.evaluate(params, out),
            Self::Gaussian2D(m) => m.evaluate(params, out),
        }
    }

    pub fn jacobian(&self, params: &[f64], jac: &mut DMatrix<f64>) {
        match self {
            Self::Gaussian1D(m) => m.jacobian(params, jac),
            Self::Gaussian2D(m) => m.jacobian(params, jac),
        }
    }

    pub fn bounds(&self) -> Bounds {
        match self {
            Self::Gaussian1D(m) => m.bounds(),
            Self::Gaussian2D(m) => m.bounds(),
        }
    }

    /// Canonicalize an unconstrained solution: widths positive, with the
    /// correlation sign following the axis flips.
    pub fn normalize(&self, params: &mut [f64]) {
        match self {
            Self::Gaussian1D(_) => params[2] = params[2].abs(),
            Self::Gaussian2D(_) => {
                if params[3] < 0.0 {
                    params[3] = -params[3];
                    params[5] = -params[5];
                }
                if params[4] < 0.0 {
                    params[4] = -params[4];
                    params[5] = -params[5];
                }
            }
        }
    }

    /// Convert internal (sigma) parameters into the reported (FWHM) vector.
    pub fn to_reported(&self, params: &[f64]) -> Vec<f64> {
        let mut out = params.to_vec();
        match self {
            Self::Gaussian1D(_) => out[2] *= FWHM_FACTOR,
            Self::Gaussian2D(_) => {
                out[3] *= FWHM_FACTOR;
                out[4] *= FWHM_FACTOR;
            }
        }
        out
    }

    /// Convert a reported (FWHM) vector back into internal parameters.
    pub fn from_reported(&self, reported: &[f64]) -> Vec<f64> {
        let mut out = reported.to_vec();
        match self {
            Self::Gaussian1D(_) => out[2] /= FWHM_FACTOR,
            Self::Gaussian2D(_) => {
                out[3] /= FWHM_FACTOR;
                out[4] /= FWHM_FACTOR;
            }
        }
        out
    }
}

/// Minimum and maximum of a coordinate sequence.
pub(crate) fn span(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}
