//! Parallel fitting of whole volumes: batch sizing, the shared read-only
//! copy of the volume, and the ordered dispatch loop.

pub mod orchestrator;
pub mod partition;
pub mod shared;

pub use orchestrator::{fit_sequential, BatchedFitter, CancellationToken};
pub use partition::{optimal_batch_size, Batch, BatchLimits, BatchPlan, SystemResources};
pub use shared::{SegmentProbe, SharedVolume, SharedVolumeHandle};
