use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use memmap2::{Mmap, MmapMut};
use ndarray::ArrayView3;
use tracing::debug;

use crate::error::{Result, RockitError};
use crate::volume::VolumeShape;

static SEGMENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Read-only anonymous mapping holding one volume as native-endian f64.
struct Segment {
    name: String,
    shape: VolumeShape,
    map: Mmap,
}

impl Drop for Segment {
    fn drop(&mut self) {
        debug!(segment = %self.name, bytes = self.map.len(), "Released shared volume");
    }
}

/// Owner of the shared copy of an intensity volume.
///
/// Created once per batched run. Workers attach only through
/// [`SharedVolumeHandle`]s obtained from [`SharedVolume::handle`]; the
/// `rockit-{pid}-{seq}` name labels the segment in logs and cannot be used
/// to attach. The mapping is unmapped when the owner has been released and
/// the last handle is dropped.
pub struct SharedVolume {
    segment: Arc<Segment>,
}

impl SharedVolume {
    /// Copy `data` into a fresh read-only segment.
    pub fn create(data: &ArrayView3<'_, f64>) -> Result<Self> {
        let shape = VolumeShape::of(data);
        if shape.is_empty() {
            return Err(RockitError::EmptyVolume);
        }
        let name = format!(
            "rockit-{}-{}",
            std::process::id(),
            SEGMENT_COUNTER.fetch_add(1, Ordering::Relaxed)
        );

        let mut map = MmapMut::map_anon(shape.nbytes())
            .map_err(|e| RockitError::SharedMemory(format!("{name}: {e}")))?;
        {
            let samples: &mut [f64] = bytemuck::try_cast_slice_mut(&mut map[..])
                .map_err(|e| RockitError::SharedMemory(format!("{name}: {e}")))?;
            for (dst, &src) in samples.iter_mut().zip(data.iter()) {
                *dst = src;
            }
        }
        let map = map
            .make_read_only()
            .map_err(|e| RockitError::SharedMemory(format!("{name}: {e}")))?;

        debug!(segment = %name, bytes = shape.nbytes(), ?shape, "Created shared volume");
        Ok(Self {
            segment: Arc::new(Segment { name, shape, map }),
        })
    }

    pub fn name(&self) -> &str {
        &self.segment.name
    }

    pub fn shape(&self) -> VolumeShape {
        self.segment.shape
    }

    /// Attach a worker to the segment.
    pub fn handle(&self) -> SharedVolumeHandle {
        SharedVolumeHandle {
            segment: Arc::clone(&self.segment),
        }
    }

    /// Observer that reports when the segment has been unmapped.
    pub fn probe(&self) -> SegmentProbe {
        SegmentProbe {
            name: self.segment.name.clone(),
            segment: Arc::downgrade(&self.segment),
        }
    }

    /// Drop the owner's reference. The mapping goes away once outstanding
    /// handles are dropped as well.
    pub fn release(self) {
        debug!(
            segment = %self.segment.name,
            attached = Arc::strong_count(&self.segment) - 1,
            "Releasing shared volume"
        );
    }
}

/// A worker's attachment to a [`SharedVolume`].
#[derive(Clone)]
pub struct SharedVolumeHandle {
    segment: Arc<Segment>,
}

impl SharedVolumeHandle {
    pub fn shape(&self) -> VolumeShape {
        self.segment.shape
    }

    /// Zero-copy view of the shared volume.
    pub fn view(&self) -> Result<ArrayView3<'_, f64>> {
        let samples: &[f64] = bytemuck::try_cast_slice(&self.segment.map[..])
            .map_err(|e| RockitError::SharedMemory(format!("{}: {e}", self.segment.name)))?;
        let shape = self.segment.shape;
        ArrayView3::from_shape((shape.frames, shape.rows, shape.cols), samples)
            .map_err(|e| RockitError::SharedMemory(format!("{}: {e}", self.segment.name)))
    }
}

/// Weak observer of a segment's lifetime.
#[derive(Clone, Debug)]
pub struct SegmentProbe {
    name: String,
    segment: Weak<Segment>,
}

impl SegmentProbe {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the owner and every handle have been dropped.
    pub fn is_released(&self) -> bool {
        self.segment.strong_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn handle_views_copy_of_volume() {
        let data = Array3::from_shape_fn((4, 2, 3), |(f, r, c)| (f * 100 + r * 10 + c) as f64);
        let shared = SharedVolume::create(&data.view()).unwrap();
        let handle = shared.handle();
        let view = handle.view().unwrap();
        assert_eq!(view, data.view());
        assert_eq!(handle.shape(), VolumeShape::new(4, 2, 3));
    }

    #[test]
    fn non_standard_layout_is_copied_logically() {
        let data = Array3::from_shape_fn((3, 4, 5), |(f, r, c)| (f * 100 + r * 10 + c) as f64);
        let permuted = data.view().permuted_axes([0, 2, 1]);
        let shared = SharedVolume::create(&permuted).unwrap();
        let handle = shared.handle();
        assert_eq!(handle.view().unwrap(), permuted);
    }

    #[test]
    fn segment_released_after_owner_and_handles_drop() {
        let data = Array3::<f64>::ones((2, 2, 2));
        let shared = SharedVolume::create(&data.view()).unwrap();
        let probe = shared.probe();
        let handle = shared.handle();
        shared.release();
        assert!(!probe.is_released());
        drop(handle);
        assert!(probe.is_released());
    }

    #[test]
    fn segment_names_are_unique() {
        let data = Array3::<f64>::ones((1, 1, 1));
        let a = SharedVolume::create(&data.view()).unwrap();
        let b = SharedVolume::create(&data.view()).unwrap();
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn handles_share_the_owner_segment() {
        let data = Array3::from_shape_fn((3, 2, 2), |(f, r, c)| (f * 4 + r * 2 + c) as f64);
        let shared = SharedVolume::create(&data.view()).unwrap();
        let (first, second) = (shared.handle(), shared.handle());
        assert_eq!(shared.probe().name(), shared.name());
        assert!(shared.name().starts_with(&format!("rockit-{}-", std::process::id())));
        assert_eq!(first.view().unwrap(), second.view().unwrap());
        assert_eq!(first.shape(), shared.shape());
    }

    #[test]
    fn empty_volume_is_rejected() {
        let data = Array3::<f64>::zeros((0, 2, 2));
        assert!(matches!(
            SharedVolume::create(&data.view()),
            Err(RockitError::EmptyVolume)
        ));
    }
}
