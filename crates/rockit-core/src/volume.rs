use ndarray::{s, ArrayView1, ArrayView3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, RockitError};

/// Shape of an intensity volume: (frames, rows, cols).
///
/// The frame axis follows acquisition order; every pixel `(row, col)` owns
/// one curve of `frames` samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeShape {
    pub frames: usize,
    pub rows: usize,
    pub cols: usize,
}

impl VolumeShape {
    pub fn new(frames: usize, rows: usize, cols: usize) -> Self {
        Self { frames, rows, cols }
    }

    pub fn of(data: &ArrayView3<'_, f64>) -> Self {
        let (frames, rows, cols) = data.dim();
        Self { frames, rows, cols }
    }

    /// Number of curves (one per pixel).
    pub fn pixels(&self) -> usize {
        self.rows * self.cols
    }

    /// Convert a linear pixel index into `(row, col)`.
    pub fn pixel_position(&self, idx: usize) -> (usize, usize) {
        (idx / self.cols, idx % self.cols)
    }

    /// Number of f64 samples in the whole volume.
    pub fn len(&self) -> usize {
        self.frames * self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the volume in bytes when stored as f64.
    pub fn nbytes(&self) -> usize {
        self.len() * std::mem::size_of::<f64>()
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.frames, self.rows, self.cols]
    }
}

/// The curve of the pixel at linear index `idx`.
pub fn curve_at<'a>(data: &'a ArrayView3<'_, f64>, idx: usize) -> ArrayView1<'a, f64> {
    let cols = data.dim().2;
    data.slice(s![.., idx / cols, idx % cols])
}

/// Per-frame coordinate values the curves are fitted against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Coordinates {
    /// No motor positions: the frame index is the coordinate.
    FrameIndex,
    /// One position per frame (1D rocking scan).
    Axis(Vec<f64>),
    /// Two positions per frame laid out on a `(rows, cols)` grid, `x`
    /// varying fastest (2D scan, e.g. two motors).
    Grid {
        x: Vec<f64>,
        y: Vec<f64>,
        shape: (usize, usize),
    },
}

impl Coordinates {
    /// Build coordinates from per-dimension metadata values.
    ///
    /// `values[0]` is the slow dimension and `values[1]` the fast one, as
    /// they come from a dataset's dimension list. Two dimensions require an
    /// explicit `shape`. Each sequence may hold either one value per frame
    /// or the axis ticks of its grid dimension.
    pub fn from_dimensions(values: Vec<Vec<f64>>, shape: Option<(usize, usize)>) -> Result<Self> {
        match values.len() {
            0 => Ok(Self::FrameIndex),
            1 => Ok(Self::Axis(values.into_iter().next().unwrap_or_default())),
            2 => {
                let shape = shape.ok_or_else(|| {
                    RockitError::InvalidConfig("a 2D fit requires a grid shape".into())
                })?;
                let mut it = values.into_iter();
                let y = it.next().unwrap_or_default();
                let x = it.next().unwrap_or_default();
                let frames = shape.0 * shape.1;
                if x.len() == shape.1 && y.len() == shape.0 && x.len() != frames {
                    Ok(Self::grid_from_axes(&x, &y))
                } else {
                    Ok(Self::Grid { x, y, shape })
                }
            }
            n => Err(RockitError::UnsupportedDimensionality(n)),
        }
    }

    /// Expand two axes into per-frame grid coordinates (x fastest).
    pub fn grid_from_axes(x_axis: &[f64], y_axis: &[f64]) -> Self {
        let shape = (y_axis.len(), x_axis.len());
        let mut x = Vec::with_capacity(shape.0 * shape.1);
        let mut y = Vec::with_capacity(shape.0 * shape.1);
        for &yv in y_axis {
            for &xv in x_axis {
                x.push(xv);
                y.push(yv);
            }
        }
        Self::Grid { x, y, shape }
    }

    /// Number of scan dimensions.
    pub fn ndim(&self) -> usize {
        match self {
            Self::FrameIndex | Self::Axis(_) => 1,
            Self::Grid { .. } => 2,
        }
    }

    /// Check that the coordinates describe exactly `frames` frames.
    pub fn validate(&self, frames: usize) -> Result<()> {
        match self {
            Self::FrameIndex => Ok(()),
            Self::Axis(values) => {
                if values.len() != frames {
                    return Err(RockitError::CoordinateMismatch {
                        expected: frames,
                        got: values.len(),
                    });
                }
                Ok(())
            }
            Self::Grid { x, y, shape } => {
                if shape.0 * shape.1 != frames || shape.0 == 0 || shape.1 == 0 {
                    return Err(RockitError::InvalidGrid {
                        rows: shape.0,
                        cols: shape.1,
                        frames,
                    });
                }
                for values in [x, y] {
                    if values.len() != frames {
                        return Err(RockitError::CoordinateMismatch {
                            expected: frames,
                            got: values.len(),
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// 1D positions resolved for `frames` frames (frame index when absent).
    pub fn axis_values(&self, frames: usize) -> Vec<f64> {
        match self {
            Self::FrameIndex => (0..frames).map(|i| i as f64).collect(),
            Self::Axis(values) => values.clone(),
            Self::Grid { x, .. } => x.clone(),
        }
    }
}

/// Metadata about a source frame stack.
#[derive(Clone, Debug)]
pub struct SourceInfo {
    pub filename: PathBuf,
    pub total_frames: usize,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub observer: Option<String>,
    pub instrument: Option<String>,
}
