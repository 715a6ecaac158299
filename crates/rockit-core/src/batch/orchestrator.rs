use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use ndarray::ArrayView3;
use rayon::ThreadPool;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, RockitError};
use crate::fit::{CurveFit, CurveFitter, ModelKind};
use crate::maps::{FittedVolume, MapAssembler};
use crate::volume::{curve_at, VolumeShape};

use super::partition::{Batch, BatchLimits, BatchPlan, SystemResources};
use super::shared::{SegmentProbe, SharedVolume, SharedVolumeHandle};

/// Cooperative cancellation flag shared between a run and its callers.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum BatchOutcome {
    Fitted(Vec<CurveFit>),
    /// Cancellation was observed before the batch started.
    Skipped,
    Failed(String),
}

struct BatchMessage {
    batch: Batch,
    outcome: BatchOutcome,
}

type CurveFn = dyn Fn(&[f64]) -> CurveFit + Send + Sync;

/// Fits every pixel of a volume in parallel batches.
///
/// The volume is copied once into a [`SharedVolume`] that the pool's workers
/// read from. Results are reassembled in batch order, so the output does not
/// depend on which worker finishes first.
pub struct BatchedFitter<'a> {
    data: ArrayView3<'a, f64>,
    fit_curve: Arc<CurveFn>,
    kind: ModelKind,
    limits: BatchLimits,
    resources: SystemResources,
    workers: usize,
    cancel: CancellationToken,
    last_segment: Mutex<Option<SegmentProbe>>,
}

impl<'a> BatchedFitter<'a> {
    pub fn new(data: ArrayView3<'a, f64>, fitter: CurveFitter) -> Self {
        let kind = fitter.model().kind();
        Self::from_fn(data, kind, move |y| fitter.fit(y))
    }

    /// Fit each curve with `fit_curve`, which must report `kind` parameters.
    pub fn from_fn<F>(data: ArrayView3<'a, f64>, kind: ModelKind, fit_curve: F) -> Self
    where
        F: Fn(&[f64]) -> CurveFit + Send + Sync + 'static,
    {
        let resources = SystemResources::detect();
        Self {
            data,
            fit_curve: Arc::new(fit_curve),
            kind,
            limits: BatchLimits::default(),
            workers: resources.default_workers(),
            resources,
            cancel: CancellationToken::new(),
            last_segment: Mutex::new(None),
        }
    }

    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Override the detected memory and CPU budget used for batch sizing.
    pub fn with_resources(mut self, resources: SystemResources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Use an externally owned token instead of the fitter's own.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation. Batches already running finish; nothing new is
    /// dispatched and [`fit`](Self::fit) returns [`RockitError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Lifetime observer of the shared segment used by the latest run.
    pub fn segment_probe(&self) -> Option<SegmentProbe> {
        self.last_segment.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn plan(&self) -> Result<BatchPlan> {
        let shape = VolumeShape::of(&self.data);
        BatchPlan::new(shape.pixels(), shape.frames, &self.resources, &self.limits)
    }

    pub fn fit(&self) -> Result<FittedVolume> {
        self.fit_with_progress(|_, _| {})
    }

    /// Fit all pixels, calling `progress(done, total)` after each batch is
    /// assembled.
    pub fn fit_with_progress<F>(&self, mut progress: F) -> Result<FittedVolume>
    where
        F: FnMut(usize, usize),
    {
        let shape = VolumeShape::of(&self.data);
        if shape.is_empty() {
            return Err(RockitError::EmptyVolume);
        }
        if self.cancel.is_cancelled() {
            return Err(RockitError::Cancelled);
        }

        let plan = self.plan()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("rockit-fit-{i}"))
            .build()
            .map_err(|e| RockitError::ThreadPool(e.to_string()))?;
        let shared = SharedVolume::create(&self.data)?;
        if let Ok(mut slot) = self.last_segment.lock() {
            *slot = Some(shared.probe());
        }

        info!(
            pixels = shape.pixels(),
            frames = shape.frames,
            batches = plan.len(),
            batch_size = plan.batch_size,
            workers = self.workers,
            model = %self.kind,
            "Starting batched fit"
        );

        let result = self.run(&pool, &shared, shape, &plan, &mut progress);
        shared.release();
        drop(pool);

        match &result {
            Ok(_) => debug!("Batched fit complete"),
            Err(RockitError::Cancelled) => info!("Batched fit cancelled"),
            Err(e) => warn!(error = %e, "Batched fit failed"),
        }
        result
    }

    /// Dispatch loop. Keeps a bounded window of batches in flight and hands
    /// completed batches to the assembler strictly in batch order. Every
    /// dispatched batch is received before returning, so no worker holds the
    /// shared segment afterwards.
    fn run<F>(
        &self,
        pool: &ThreadPool,
        shared: &SharedVolume,
        shape: VolumeShape,
        plan: &BatchPlan,
        progress: &mut F,
    ) -> Result<FittedVolume>
    where
        F: FnMut(usize, usize),
    {
        let (tx, rx) = mpsc::channel::<BatchMessage>();
        let window = self.workers * 2;
        let total = shape.pixels();

        let mut pending = plan.batches.iter().copied();
        let mut in_flight = 0usize;
        let mut reorder: BTreeMap<usize, (Batch, Vec<CurveFit>)> = BTreeMap::new();
        let mut next_batch = 0usize;
        let mut done = 0usize;
        let mut assembler = MapAssembler::new(shape, self.kind);
        let mut failure: Option<RockitError> = None;

        loop {
            while failure.is_none() && in_flight < window && !self.cancel.is_cancelled() {
                let Some(batch) = pending.next() else {
                    break;
                };
                self.dispatch(pool, shared.handle(), batch, tx.clone());
                in_flight += 1;
            }
            if in_flight == 0 {
                break;
            }

            let message = match rx.recv() {
                Ok(message) => message,
                Err(e) => {
                    failure.get_or_insert(RockitError::ThreadPool(e.to_string()));
                    break;
                }
            };
            in_flight -= 1;
            if failure.is_some() {
                continue;
            }

            let batch = message.batch;
            match message.outcome {
                BatchOutcome::Fitted(fits) => {
                    reorder.insert(batch.index, (batch, fits));
                }
                BatchOutcome::Skipped => {}
                BatchOutcome::Failed(reason) => {
                    failure = Some(RockitError::BatchFailed {
                        batch: batch.index,
                        start: batch.start,
                        end: batch.end,
                        reason,
                    });
                    continue;
                }
            }

            while let Some((batch, fits)) = reorder.remove(&next_batch) {
                if let Err(e) = assembler.push_batch(batch.start, &fits) {
                    failure = Some(e);
                    break;
                }
                next_batch += 1;
                done += batch.len();
                progress(done, total);
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if next_batch < plan.len() {
            return Err(RockitError::Cancelled);
        }
        assembler.finish()
    }

    fn dispatch(
        &self,
        pool: &ThreadPool,
        handle: SharedVolumeHandle,
        batch: Batch,
        tx: mpsc::Sender<BatchMessage>,
    ) {
        let fit_curve = Arc::clone(&self.fit_curve);
        let cancel = self.cancel.clone();
        pool.spawn(move || {
            let outcome = if cancel.is_cancelled() {
                drop(handle);
                BatchOutcome::Skipped
            } else {
                let job = AssertUnwindSafe(|| fit_batch(handle, fit_curve.as_ref(), batch));
                match catch_unwind(job) {
                    Ok(Ok(fits)) => BatchOutcome::Fitted(fits),
                    Ok(Err(e)) => BatchOutcome::Failed(e.to_string()),
                    Err(panic) => BatchOutcome::Failed(panic_message(panic.as_ref())),
                }
            };
            // The receiver is gone only if the dispatch loop already bailed.
            let _ = tx.send(BatchMessage { batch, outcome });
        });
    }
}

/// Fit pixels `batch.start..batch.end` from the shared volume. The handle
/// is dropped before returning.
fn fit_batch(
    handle: SharedVolumeHandle,
    fit_curve: &CurveFn,
    batch: Batch,
) -> Result<Vec<CurveFit>> {
    let view = handle.view()?;
    trace!(batch = batch.index, start = batch.start, end = batch.end, "Fitting batch");
    let mut samples = Vec::with_capacity(view.dim().0);
    let fits = (batch.start..batch.end)
        .map(|idx| {
            samples.clear();
            samples.extend(curve_at(&view, idx).iter().copied());
            fit_curve(&samples)
        })
        .collect();
    Ok(fits)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Fit every pixel on the calling thread, one row at a time.
///
/// Produces the same maps as [`BatchedFitter`] for the same fitter.
pub fn fit_sequential<F>(
    data: &ArrayView3<'_, f64>,
    fitter: &CurveFitter,
    cancel: Option<&CancellationToken>,
    mut progress: F,
) -> Result<FittedVolume>
where
    F: FnMut(usize, usize),
{
    let shape = VolumeShape::of(data);
    if shape.is_empty() {
        return Err(RockitError::EmptyVolume);
    }
    debug!(pixels = shape.pixels(), method = %fitter.method(), "Fitting sequentially");

    let total = shape.pixels();
    let mut assembler = MapAssembler::new(shape, fitter.model().kind());
    let mut samples = Vec::with_capacity(shape.frames);
    let mut row_fits = Vec::with_capacity(shape.cols);
    for row in 0..shape.rows {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(RockitError::Cancelled);
        }
        let start = row * shape.cols;
        row_fits.clear();
        for idx in start..start + shape.cols {
            samples.clear();
            samples.extend(curve_at(data, idx).iter().copied());
            row_fits.push(fitter.fit(&samples));
        }
        assembler.push_batch(start, &row_fits)?;
        progress(start + shape.cols, total);
    }
    assembler.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn panic_payloads_become_messages() {
        let caught = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom");
        let caught = catch_unwind(|| panic!("{}", String::from("owned"))).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "owned");
    }
}
