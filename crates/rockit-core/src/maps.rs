use ndarray::{s, Array3, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RockitError};
use crate::fit::{CurveFit, FitStatus, ModelKind};
use crate::volume::VolumeShape;

/// Per-pixel fit parameters stacked as `(n_params, rows, cols)`.
#[derive(Clone, Debug)]
pub struct ParameterMaps {
    kind: ModelKind,
    data: Array3<f64>,
}

impl ParameterMaps {
    pub fn zeros(kind: ModelKind, rows: usize, cols: usize) -> Self {
        Self {
            kind,
            data: Array3::zeros((kind.n_params(), rows, cols)),
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn n_params(&self) -> usize {
        self.data.dim().0
    }

    pub fn names(&self) -> &'static [&'static str] {
        self.kind.param_names()
    }

    /// Spatial shape `(rows, cols)` of every plane.
    pub fn dim(&self) -> (usize, usize) {
        let (_, rows, cols) = self.data.dim();
        (rows, cols)
    }

    pub fn as_array(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn into_array(self) -> Array3<f64> {
        self.data
    }

    /// Plane of the `k`-th parameter.
    pub fn plane(&self, k: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), k)
    }

    /// Plane by display name (e.g. `"FWHM"`).
    pub fn by_name(&self, name: &str) -> Option<ArrayView2<'_, f64>> {
        self.names()
            .iter()
            .position(|n| *n == name)
            .map(|k| self.plane(k))
    }

    /// `(name, plane)` pairs in parameter order.
    pub fn planes(&self) -> impl Iterator<Item = (&'static str, ArrayView2<'_, f64>)> {
        self.names()
            .iter()
            .copied()
            .zip(self.data.axis_iter(Axis(0)))
    }

    /// Parameter vector of pixel `(row, col)`.
    pub fn pixel(&self, row: usize, col: usize) -> ArrayView1<'_, f64> {
        self.data.slice(s![.., row, col])
    }
}

/// How many pixels ended in each [`FitStatus`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitSummary {
    pub fitted: usize,
    pub flat: usize,
    pub fallback: usize,
}

impl FitSummary {
    pub fn record(&mut self, status: FitStatus) {
        match status {
            FitStatus::Fitted => self.fitted += 1,
            FitStatus::Flat => self.flat += 1,
            FitStatus::Fallback(_) => self.fallback += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.fitted + self.flat + self.fallback
    }
}

/// Fitted-curve volume and parameter maps of a complete run.
#[derive(Clone, Debug)]
pub struct FittedVolume {
    /// Model curves, same shape as the input volume.
    pub curves: Array3<f64>,
    pub maps: ParameterMaps,
    pub summary: FitSummary,
}

/// Scatters per-pixel results back onto the spatial grid.
///
/// Results must arrive in linear pixel order, `[0, rows * cols)`, without
/// gaps or repeats; anything else is rejected.
pub struct MapAssembler {
    shape: VolumeShape,
    curves: Array3<f64>,
    maps: ParameterMaps,
    summary: FitSummary,
    next: usize,
}

impl MapAssembler {
    pub fn new(shape: VolumeShape, kind: ModelKind) -> Self {
        Self {
            shape,
            curves: Array3::zeros((shape.frames, shape.rows, shape.cols)),
            maps: ParameterMaps::zeros(kind, shape.rows, shape.cols),
            summary: FitSummary::default(),
            next: 0,
        }
    }

    /// Linear index of the next pixel expected.
    pub fn next_index(&self) -> usize {
        self.next
    }

    pub fn is_complete(&self) -> bool {
        self.next == self.shape.pixels()
    }

    /// Place the results of pixels `start..start + fits.len()`.
    pub fn push_batch(&mut self, start: usize, fits: &[CurveFit]) -> Result<()> {
        if start != self.next {
            return Err(RockitError::OutOfOrder {
                expected: self.next,
                got: start,
            });
        }
        let total = self.shape.pixels();
        if start + fits.len() > total {
            return Err(RockitError::IndexOutOfRange {
                index: start + fits.len() - 1,
                len: total,
            });
        }

        let n_params = self.maps.n_params();
        for (offset, fit) in fits.iter().enumerate() {
            if fit.curve.len() != self.shape.frames || fit.params.len() != n_params {
                return Err(RockitError::ShapeMismatch {
                    left: vec![self.shape.frames, n_params],
                    right: vec![fit.curve.len(), fit.params.len()],
                });
            }
            let (row, col) = self.shape.pixel_position(start + offset);
            self.curves
                .slice_mut(s![.., row, col])
                .assign(&ArrayView1::from(fit.curve.as_slice()));
            self.maps
                .data
                .slice_mut(s![.., row, col])
                .assign(&ArrayView1::from(fit.params.as_slice()));
            self.summary.record(fit.status);
        }
        self.next += fits.len();
        Ok(())
    }

    pub fn finish(self) -> Result<FittedVolume> {
        if !self.is_complete() {
            return Err(RockitError::IncompleteResults {
                expected: self.shape.pixels(),
                got: self.next,
            });
        }
        Ok(FittedVolume {
            curves: self.curves,
            maps: self.maps,
            summary: self.summary,
        })
    }
}
