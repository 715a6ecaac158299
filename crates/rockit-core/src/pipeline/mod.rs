pub mod config;
mod orchestrator;
mod types;

pub use config::FitOptions;
pub use orchestrator::{fit, fit_reported, fit_with_values};
pub use types::{FitOutput, FitStage, ProgressReporter};
