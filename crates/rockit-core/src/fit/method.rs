use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RockitError;

/// Nonlinear least-squares algorithm used for a single curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMethod {
    /// Levenberg-Marquardt, unconstrained. Fastest on clean, wide peaks.
    Lm,
    /// Trust-region reflective, bounded. Most robust on noisy curves.
    Trf,
    /// Dogleg in a box, bounded. Converges well on narrow peaks.
    Dogbox,
}

impl FitMethod {
    pub const ALL: [FitMethod; 3] = [FitMethod::Lm, FitMethod::Trf, FitMethod::Dogbox];

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Lm => "lm",
            Self::Trf => "trf",
            Self::Dogbox => "dogbox",
        }
    }

    /// Whether the algorithm honors parameter bounds.
    pub fn is_bounded(&self) -> bool {
        !matches!(self, Self::Lm)
    }
}

impl fmt::Display for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for FitMethod {
    type Err = RockitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lm" => Ok(Self::Lm),
            "trf" => Ok(Self::Trf),
            "dogbox" => Ok(Self::Dogbox),
            _ => Err(RockitError::InvalidMethod(s.to_string())),
        }
    }
}

/// Method requested by the caller: a fixed algorithm or automatic selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodChoice {
    #[default]
    Auto,
    Lm,
    Trf,
    Dogbox,
}

impl MethodChoice {
    /// The fixed method, or `None` for automatic selection.
    pub fn fixed(&self) -> Option<FitMethod> {
        match self {
            Self::Auto => None,
            Self::Lm => Some(FitMethod::Lm),
            Self::Trf => Some(FitMethod::Trf),
            Self::Dogbox => Some(FitMethod::Dogbox),
        }
    }
}

impl From<FitMethod> for MethodChoice {
    fn from(method: FitMethod) -> Self {
        match method {
            FitMethod::Lm => Self::Lm,
            FitMethod::Trf => Self::Trf,
            FitMethod::Dogbox => Self::Dogbox,
        }
    }
}

impl fmt::Display for MethodChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fixed() {
            Some(method) => write!(f, "{method}"),
            None => write!(f, "auto"),
        }
    }
}

impl FromStr for MethodChoice {
    type Err = RockitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        s.parse::<FitMethod>().map(Self::from)
    }
}
