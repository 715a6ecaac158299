use std::sync::Arc;

use ndarray::ArrayView3;
use tracing::info;

use crate::batch::{fit_sequential, BatchedFitter, CancellationToken};
use crate::error::{Result, RockitError};
use crate::fit::{CurveFitter, FitMethod, MethodChoice, PeakModel};
use crate::residuals::compute_residuals;
use crate::select::select_optimal_fit_method;
use crate::volume::{Coordinates, VolumeShape};

use super::config::FitOptions;
use super::types::{FitOutput, FitStage, NoOpReporter, ProgressReporter};

/// Fit every pixel of `data` against `coords`.
pub fn fit(
    data: &ArrayView3<'_, f64>,
    coords: &Coordinates,
    options: &FitOptions,
) -> Result<FitOutput> {
    fit_reported(data, coords, options, Arc::new(NoOpReporter), None)
}

/// Fit from raw per-dimension coordinate values and a method name.
///
/// `values` holds zero, one or two coordinate sequences; two require
/// `shape`. `method` is one of `auto`, `lm`, `trf`, `dogbox`.
pub fn fit_with_values(
    data: &ArrayView3<'_, f64>,
    values: Vec<Vec<f64>>,
    shape: Option<(usize, usize)>,
    int_thresh: f64,
    method: &str,
) -> Result<FitOutput> {
    let options = FitOptions {
        int_thresh,
        method: method.parse::<MethodChoice>()?,
        ..Default::default()
    };
    let coords = Coordinates::from_dimensions(values, shape)?;
    fit(data, &coords, &options)
}

/// Fit every pixel, reporting progress and polling `cancel` between batches.
///
/// Configuration problems are reported before any fitting starts. A
/// cancelled run returns [`RockitError::Cancelled`] and no partial maps.
pub fn fit_reported(
    data: &ArrayView3<'_, f64>,
    coords: &Coordinates,
    options: &FitOptions,
    reporter: Arc<dyn ProgressReporter>,
    cancel: Option<CancellationToken>,
) -> Result<FitOutput> {
    options.validate()?;
    let shape = VolumeShape::of(data);
    if shape.is_empty() {
        return Err(RockitError::EmptyVolume);
    }
    let model = PeakModel::for_coordinates(coords, shape.frames)?;

    let method = resolve_method(data, options, reporter.as_ref())?;
    let fitter = CurveFitter::new(model, options.int_thresh, method)
        .with_solver(options.solver.clone());

    info!(
        frames = shape.frames,
        rows = shape.rows,
        cols = shape.cols,
        model = %fitter.model().kind(),
        %method,
        int_thresh = options.int_thresh,
        "Fitting rocking curves"
    );

    let pixels = shape.pixels();
    reporter.begin_stage(FitStage::Fitting, Some(pixels));
    let batched = options.use_optimizations && pixels >= options.batching.sequential_below;
    let fitted = if batched {
        let mut runner =
            BatchedFitter::new(data.view(), fitter).with_limits(options.batching.clone());
        if let Some(workers) = options.workers {
            runner = runner.with_workers(workers);
        }
        if let Some(token) = cancel {
            runner = runner.with_cancellation(token);
        }
        runner.fit_with_progress(|done, _| reporter.advance(done))?
    } else {
        fit_sequential(data, &fitter, cancel.as_ref(), |done, _| {
            reporter.advance(done)
        })?
    };
    reporter.finish_stage();

    info!(
        fitted = fitted.summary.fitted,
        flat = fitted.summary.flat,
        fallback = fitted.summary.fallback,
        "Fit complete"
    );

    let residuals = if options.compute_residuals {
        reporter.begin_stage(FitStage::Residuals, Some(pixels));
        let residuals = compute_residuals(&fitted.curves.view(), data, None)?;
        reporter.finish_stage();
        Some(residuals)
    } else {
        None
    };

    Ok(FitOutput::new(fitted, method, residuals))
}

fn resolve_method(
    data: &ArrayView3<'_, f64>,
    options: &FitOptions,
    reporter: &dyn ProgressReporter,
) -> Result<FitMethod> {
    if let Some(method) = options.method.fixed() {
        return Ok(method);
    }
    reporter.begin_stage(FitStage::SelectingMethod, Some(options.selector.sample_size));
    let method = select_optimal_fit_method(data, &options.selector)?;
    reporter.finish_stage();
    info!(%method, "Auto-selected fit method");
    Ok(method)
}
