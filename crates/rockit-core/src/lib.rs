pub mod batch;
pub mod consts;
pub mod error;
pub mod fit;
pub mod io;
pub mod maps;
pub mod pipeline;
pub mod residuals;
pub mod select;
pub mod volume;

pub use error::{Result, RockitError};
pub use fit::{fit_2d_rocking_curve, fit_rocking_curve, FitMethod, MethodChoice};
pub use pipeline::{fit, fit_reported, fit_with_values, FitOptions, FitOutput};
pub use residuals::compute_residuals;
pub use select::select_optimal_fit_method;
