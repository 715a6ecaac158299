use serde::{Deserialize, Serialize};

use crate::batch::BatchLimits;
use crate::consts::DEFAULT_INT_THRESH;
use crate::error::{Result, RockitError};
use crate::fit::{MethodChoice, SolverConfig};
use crate::select::SelectorConfig;

/// Options of a full-volume fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Curves whose peak-to-peak range is below this are treated as flat.
    pub int_thresh: f64,
    pub method: MethodChoice,
    /// Batched parallel path; `false` fits every pixel on the caller's thread.
    pub use_optimizations: bool,
    pub compute_residuals: bool,
    /// Worker threads. Defaults to one less than the CPU count.
    pub workers: Option<usize>,
    pub selector: SelectorConfig,
    pub batching: BatchLimits,
    pub solver: SolverConfig,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            int_thresh: DEFAULT_INT_THRESH,
            method: MethodChoice::Auto,
            use_optimizations: true,
            compute_residuals: true,
            workers: None,
            selector: SelectorConfig::default(),
            batching: BatchLimits::default(),
            solver: SolverConfig::default(),
        }
    }
}

impl FitOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.int_thresh.is_finite() || self.int_thresh < 0.0 {
            return Err(RockitError::InvalidConfig(format!(
                "intensity threshold must be a non-negative number, got {}",
                self.int_thresh
            )));
        }
        if self.workers == Some(0) {
            return Err(RockitError::InvalidConfig("worker count must be positive".into()));
        }
        if self.solver.max_iterations == 0 {
            return Err(RockitError::InvalidConfig(
                "solver needs at least one iteration".into(),
            ));
        }
        if self.selector.sample_size == 0 {
            return Err(RockitError::InvalidConfig(
                "selector sample size must be positive".into(),
            ));
        }
        self.batching.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let options: FitOptions = toml::from_str(
            r#"
            method = "dogbox"
            int_thresh = 40.0

            [batching]
            max_batch = 200
            "#,
        )
        .unwrap();
        assert_eq!(options.method, MethodChoice::Dogbox);
        assert_eq!(options.int_thresh, 40.0);
        assert_eq!(options.batching.max_batch, 200);
        assert_eq!(options.batching.min_batch, 10);
        assert!(options.use_optimizations);
        assert_eq!(options.solver, SolverConfig::default());
    }

    #[test]
    fn negative_threshold_is_invalid() {
        let options = FitOptions {
            int_thresh: -1.0,
            ..Default::default()
        };
        assert!(options.validate().unwrap_err().is_config_error());
    }
}
