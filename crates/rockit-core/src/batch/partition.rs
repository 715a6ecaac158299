use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::debug;

use crate::consts::{
    BATCHES_PER_CPU, CURVE_OVERHEAD_FACTOR, MAX_BATCH_SIZE, MEMORY_FRACTION, MIN_BATCH_SIZE,
    SEQUENTIAL_PIXEL_THRESHOLD,
};
use crate::error::{Result, RockitError};

/// Bounds and policy for sizing batches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    pub min_batch: usize,
    pub max_batch: usize,
    /// Target number of batches per CPU.
    pub batches_per_cpu: usize,
    /// Fraction of available memory the in-flight curves may use.
    pub memory_fraction: f64,
    /// Multiplier on the raw bytes of one curve.
    pub overhead_factor: usize,
    /// Volumes with fewer pixels are fitted sequentially without a pool.
    pub sequential_below: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            min_batch: MIN_BATCH_SIZE,
            max_batch: MAX_BATCH_SIZE,
            batches_per_cpu: BATCHES_PER_CPU,
            memory_fraction: MEMORY_FRACTION,
            overhead_factor: CURVE_OVERHEAD_FACTOR,
            sequential_below: SEQUENTIAL_PIXEL_THRESHOLD,
        }
    }
}

impl BatchLimits {
    pub fn validate(&self) -> Result<()> {
        if self.min_batch == 0 || self.min_batch > self.max_batch {
            return Err(RockitError::InvalidConfig(format!(
                "batch limits must satisfy 0 < min ({}) <= max ({})",
                self.min_batch, self.max_batch
            )));
        }
        if !(self.memory_fraction > 0.0 && self.memory_fraction <= 1.0) {
            return Err(RockitError::InvalidConfig(format!(
                "memory fraction {} outside (0, 1]",
                self.memory_fraction
            )));
        }
        if self.batches_per_cpu == 0 || self.overhead_factor == 0 {
            return Err(RockitError::InvalidConfig(
                "batches per CPU and overhead factor must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Memory and CPU budget the partitioner sizes batches against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemResources {
    /// Bytes of memory currently available.
    pub available_memory: u64,
    /// Logical CPUs.
    pub cpus: usize,
}

impl SystemResources {
    /// Query the running system.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            available_memory: sys.available_memory(),
            cpus: num_cpus::get().max(1),
        }
    }

    /// Default worker count: leave one CPU to the dispatching thread.
    pub fn default_workers(&self) -> usize {
        self.cpus.saturating_sub(1).max(1)
    }
}

/// Contiguous half-open range `[start, end)` of linear pixel indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Batch {
    /// Position of the batch in dispatch order.
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Batch size for `total` curves of `frames` samples each.
///
/// Aims for `batches_per_cpu` batches per CPU, clamped to
/// `[min_batch, max_batch]` and to what fits in the memory budget.
pub fn optimal_batch_size(
    total: usize,
    frames: usize,
    resources: &SystemResources,
    limits: &BatchLimits,
) -> Result<usize> {
    limits.validate()?;
    let bytes_per_curve =
        (frames.max(1) * std::mem::size_of::<f64>() * limits.overhead_factor) as u64;
    let budget = (resources.available_memory as f64 * limits.memory_fraction) as u64;
    let max_by_memory = (budget / bytes_per_curve) as usize;
    if max_by_memory < limits.min_batch {
        return Err(RockitError::InsufficientMemory {
            available: resources.available_memory,
            required: bytes_per_curve * limits.min_batch as u64,
            min_batch: limits.min_batch,
        });
    }

    let by_cpu = total / (resources.cpus.max(1) * limits.batches_per_cpu);
    Ok(by_cpu
        .clamp(limits.min_batch, limits.max_batch)
        .min(max_by_memory))
}

/// Ordered partition of `[0, total)` into batches.
#[derive(Clone, Debug)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub total: usize,
    pub batches: Vec<Batch>,
}

impl BatchPlan {
    pub fn new(
        total: usize,
        frames: usize,
        resources: &SystemResources,
        limits: &BatchLimits,
    ) -> Result<Self> {
        let batch_size = optimal_batch_size(total, frames, resources, limits)?;
        let plan = Self::with_batch_size(total, batch_size);
        debug!(
            total,
            batch_size,
            batches = plan.batches.len(),
            cpus = resources.cpus,
            "Partitioned pixels into batches"
        );
        Ok(plan)
    }

    /// Split `[0, total)` into consecutive ranges of `batch_size` (the last
    /// one may be shorter).
    pub fn with_batch_size(total: usize, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let batches = (0..total)
            .step_by(batch_size)
            .enumerate()
            .map(|(index, start)| Batch {
                index,
                start,
                end: (start + batch_size).min(total),
            })
            .collect();
        Self {
            batch_size,
            total,
            batches,
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
