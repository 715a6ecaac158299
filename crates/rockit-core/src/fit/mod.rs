pub mod curve;
pub mod estimate;
pub mod method;
pub mod model;
pub mod solver;

pub use curve::{fit_2d_rocking_curve, fit_rocking_curve, CurveFit, CurveFitter, FitStatus};
pub use method::{FitMethod, MethodChoice};
pub use model::{ModelKind, PeakModel};
pub use solver::{SolverConfig, SolverFailure};
