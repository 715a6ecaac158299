/// Ratio between a Gaussian's full width at half maximum and its sigma.
pub const FWHM_FACTOR: f64 = 2.355;

/// Default peak-to-peak noise floor: curves below it are treated as flat.
pub const DEFAULT_INT_THRESH: f64 = 15.0;

/// Number of parameters per pixel for the 1D Gaussian model.
pub const PARAMS_1D: usize = 4;

/// Number of parameters per pixel for the 2D Gaussian model.
pub const PARAMS_2D: usize = 7;

/// Smallest number of curves in a dispatched batch.
pub const MIN_BATCH_SIZE: usize = 10;

/// Largest number of curves in a dispatched batch.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Target number of batches per CPU when sizing batches.
pub const BATCHES_PER_CPU: usize = 4;

/// Fraction of currently available memory the batch buffers may occupy.
pub const MEMORY_FRACTION: f64 = 0.5;

/// Working-copy multiplier applied to the raw bytes of one curve.
pub const CURVE_OVERHEAD_FACTOR: usize = 2;

/// Below this pixel count the volume is fitted sequentially on the caller's thread.
pub const SEQUENTIAL_PIXEL_THRESHOLD: usize = 100;

/// Number of curves sampled by the method selector.
pub const DEFAULT_SELECTOR_SAMPLE: usize = 100;

/// Noise above this fraction of the mean peak-to-peak amplitude selects `trf`.
pub const DEFAULT_NOISE_FRACTION: f64 = 0.1;

/// Peaks narrower than this fraction of the frame count select `dogbox`.
pub const DEFAULT_WIDTH_FRACTION: f64 = 0.1;

/// Side of the top-left pixel block used as the amplitude reference.
pub const SELECTOR_REFERENCE_PIXELS: usize = 10;

/// Curves shorter than this are ignored by the noise estimate.
pub const SELECTOR_MIN_FRAMES: usize = 10;

/// Largest |correlation| allowed by the bounded 2D solvers.
pub const MAX_CORRELATION: f64 = 0.999;

/// Lower bound on sigma, as a fraction of the coordinate span.
pub const MIN_SIGMA_FRACTION: f64 = 1e-6;

/// Fraction of the distance to a bound a strictly-feasible step may cover.
pub const BOUNDARY_STEP_BACK: f64 = 0.995;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-12;

/// Size of the fixed SER file header in bytes.
pub const SER_HEADER_SIZE: usize = 178;

/// Magic bytes at the start of every SER file.
pub const SER_MAGIC: &[u8; 14] = b"LUCAM-RECORDER";
