use tracing::trace;

use crate::consts::DEFAULT_INT_THRESH;
use crate::error::{Result, RockitError};
use crate::volume::Coordinates;

use super::estimate::{flat_estimate, initial_estimate, ptp};
use super::method::FitMethod;
use super::model::PeakModel;
use super::solver::{solve, SolverConfig, SolverFailure};

/// How a pixel's parameters were obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitStatus {
    /// The optimizer converged.
    Fitted,
    /// Peak-to-peak below the threshold: flat background, optimizer skipped.
    Flat,
    /// The optimizer failed; parameters are the initial estimate.
    Fallback(SolverFailure),
}

/// Result of fitting one curve.
#[derive(Clone, Debug)]
pub struct CurveFit {
    /// Model evaluated at the curve's coordinates.
    pub curve: Vec<f64>,
    /// Reported parameter vector (widths as FWHM).
    pub params: Vec<f64>,
    pub status: FitStatus,
}

impl CurveFit {
    pub fn is_fitted(&self) -> bool {
        matches!(self.status, FitStatus::Fitted)
    }
}

/// Fits individual curves of one run: the model bound to the run's
/// coordinates plus threshold, algorithm and tolerances.
#[derive(Clone, Debug)]
pub struct CurveFitter {
    model: PeakModel,
    int_thresh: f64,
    method: FitMethod,
    solver: SolverConfig,
}

impl CurveFitter {
    pub fn new(model: PeakModel, int_thresh: f64, method: FitMethod) -> Self {
        Self {
            model,
            int_thresh,
            method,
            solver: SolverConfig::default(),
        }
    }

    /// Build a fitter for `frames`-sample curves, validating the coordinates.
    pub fn for_coordinates(
        coords: &Coordinates,
        frames: usize,
        int_thresh: f64,
        method: FitMethod,
    ) -> Result<Self> {
        Ok(Self::new(
            PeakModel::for_coordinates(coords, frames)?,
            int_thresh,
            method,
        ))
    }

    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn model(&self) -> &PeakModel {
        &self.model
    }

    pub fn method(&self) -> FitMethod {
        self.method
    }

    pub fn int_thresh(&self) -> f64 {
        self.int_thresh
    }

    /// Fit one curve. Never fails: degenerate and non-converging curves come
    /// back as [`FitStatus::Flat`] or [`FitStatus::Fallback`].
    pub fn fit(&self, y: &[f64]) -> CurveFit {
        let range = ptp(y);
        if range.is_nan() || range <= 0.0 || range < self.int_thresh {
            return self.flat(y);
        }

        let estimate = initial_estimate(&self.model, y);
        let (mut params, status) =
            match solve(self.method, &self.model, y, &estimate, &self.solver) {
                Ok(solution) if solution.params.iter().all(|p| p.is_finite()) => {
                    (solution.params, FitStatus::Fitted)
                }
                Ok(_) => (estimate, FitStatus::Fallback(SolverFailure::Singular)),
                Err(failure) => {
                    trace!(%failure, method = %self.method, "curve fit fell back to estimate");
                    (estimate, FitStatus::Fallback(failure))
                }
            };
        self.model.normalize(&mut params);

        let mut curve = vec![0.0; y.len()];
        self.model.evaluate(&params, &mut curve);
        if curve.iter().any(|v| !v.is_finite()) {
            return self.flat(y);
        }

        CurveFit {
            curve,
            params: self.model.to_reported(&params),
            status,
        }
    }

    fn flat(&self, y: &[f64]) -> CurveFit {
        let params = flat_estimate(&self.model, y);
        let background = *params.last().unwrap_or(&0.0);
        CurveFit {
            curve: vec![background; y.len()],
            params,
            status: FitStatus::Flat,
        }
    }
}

/// Fit a single 1D rocking curve against `x` (frame index when `None`).
pub fn fit_rocking_curve(
    y: &[f64],
    x: Option<&[f64]>,
    int_thresh: Option<f64>,
    method: FitMethod,
) -> Result<CurveFit> {
    if y.is_empty() {
        return Err(RockitError::EmptyVolume);
    }
    let coords = match x {
        Some(values) => Coordinates::Axis(values.to_vec()),
        None => Coordinates::FrameIndex,
    };
    let fitter = CurveFitter::for_coordinates(
        &coords,
        y.len(),
        int_thresh.unwrap_or(DEFAULT_INT_THRESH),
        method,
    )?;
    Ok(fitter.fit(y))
}

/// Fit a single 2D rocking curve sampled on a `shape` grid.
pub fn fit_2d_rocking_curve(
    y: &[f64],
    x: &[f64],
    y_coords: &[f64],
    shape: (usize, usize),
    int_thresh: Option<f64>,
    method: FitMethod,
) -> Result<CurveFit> {
    if y.is_empty() {
        return Err(RockitError::EmptyVolume);
    }
    let coords = Coordinates::Grid {
        x: x.to_vec(),
        y: y_coords.to_vec(),
        shape,
    };
    let fitter = CurveFitter::for_coordinates(
        &coords,
        y.len(),
        int_thresh.unwrap_or(DEFAULT_INT_THRESH),
        method,
    )?;
    Ok(fitter.fit(y))
}
