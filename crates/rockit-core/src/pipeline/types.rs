use ndarray::{Array2, Array3};

use crate::fit::FitMethod;
use crate::maps::{FitSummary, FittedVolume, ParameterMaps};

/// Stage of a full-volume fit, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitStage {
    SelectingMethod,
    Fitting,
    Residuals,
}

impl std::fmt::Display for FitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelectingMethod => write!(f, "Selecting fit method"),
            Self::Fitting => write!(f, "Fitting rocking curves"),
            Self::Residuals => write!(f, "Computing residuals"),
        }
    }
}

/// Thread-safe progress reporting for a fit.
///
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started. `total_items` is the number of work items
    /// (pixels while fitting), if known.
    fn begin_stage(&self, _stage: FitStage, _total_items: Option<usize>) {}

    /// `items_done` work items of the current stage have completed so far.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

pub(super) struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// Everything a full-volume fit produces.
#[derive(Clone, Debug)]
pub struct FitOutput {
    /// Model curves, same shape as the input volume.
    pub curves: Array3<f64>,
    pub maps: ParameterMaps,
    /// Algorithm actually used (resolved when `auto` was requested).
    pub method: FitMethod,
    /// `|Σ fitted − Σ original|` per pixel, when requested.
    pub residuals: Option<Array2<f64>>,
    pub summary: FitSummary,
}

impl FitOutput {
    pub(super) fn new(
        fitted: FittedVolume,
        method: FitMethod,
        residuals: Option<Array2<f64>>,
    ) -> Self {
        Self {
            curves: fitted.curves,
            maps: fitted.maps,
            method,
            residuals,
            summary: fitted.summary,
        }
    }
}
