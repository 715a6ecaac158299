use thiserror::Error;

#[derive(Error, Debug)]
pub enum RockitError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid SER file: {0}")]
    InvalidSer(String),

    #[error("Unsupported color mode: {0}")]
    UnsupportedColorMode(String),

    #[error("Frame index {index} out of range (total: {total})")]
    FrameIndexOutOfRange { index: usize, total: usize },

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Empty intensity volume")]
    EmptyVolume,

    #[error("Unknown fit method '{0}' (expected one of: trf, lm, dogbox, auto)")]
    InvalidMethod(String),

    #[error("Coordinate values length mismatch: expected {expected}, got {got}")]
    CoordinateMismatch { expected: usize, got: usize },

    #[error("Unsupported number of dimensions: {0}")]
    UnsupportedDimensionality(usize),

    #[error("Invalid grid shape {rows}x{cols} for {frames} frames")]
    InvalidGrid {
        rows: usize,
        cols: usize,
        frames: usize,
    },

    #[error("Shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch {
        left: Vec<usize>,
        right: Vec<usize>,
    },

    #[error("Index {index} out of range (length: {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "Insufficient memory: {available} bytes available, a batch of {min_batch} curves needs {required}"
    )]
    InsufficientMemory {
        available: u64,
        required: u64,
        min_batch: usize,
    },

    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    #[error("Worker pool error: {0}")]
    ThreadPool(String),

    #[error("Batch {batch} (pixels {start}..{end}) failed: {reason}")]
    BatchFailed {
        batch: usize,
        start: usize,
        end: usize,
        reason: String,
    },

    #[error("Result for pixel {got} arrived where pixel {expected} was expected")]
    OutOfOrder { expected: usize, got: usize },

    #[error("Incomplete results: {got} of {expected} pixels assembled")]
    IncompleteResults { expected: usize, got: usize },

    #[error("Fitting cancelled by user")]
    Cancelled,
}

impl RockitError {
    /// True when the run stopped because a cancellation was requested,
    /// as opposed to a genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Configuration errors are raised before any work is dispatched.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMethod(_)
                | Self::CoordinateMismatch { .. }
                | Self::UnsupportedDimensionality(_)
                | Self::InvalidGrid { .. }
                | Self::InvalidConfig(_)
                | Self::EmptyVolume
        )
    }
}

pub type Result<T> = std::result::Result<T, RockitError>;
