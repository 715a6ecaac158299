pub mod config;
pub mod fit;
pub mod info;
pub mod select;

use std::path::Path;

use anyhow::{bail, Context, Result};
use rockit_core::pipeline::config::FitOptions;

/// Read whitespace-separated numbers from a text file.
pub fn read_values(path: &Path) -> Result<Vec<f64>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read coordinate values {}", path.display()))?;
    contents
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .with_context(|| format!("Invalid number '{}' in {}", token, path.display()))
        })
        .collect()
}

/// Load fit options from a TOML file, or the defaults when no file is given.
pub fn load_options(path: Option<&Path>) -> Result<FitOptions> {
    let Some(path) = path else {
        return Ok(FitOptions::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&contents).context("Invalid fit config")
}

/// Parse a grid shape written as `ROWSxCOLS`, e.g. `11x15`.
pub fn parse_grid(s: &str) -> Result<(usize, usize), String> {
    let (rows, cols) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected ROWSxCOLS, got '{s}'"))?;
    let rows = rows
        .trim()
        .parse()
        .map_err(|_| format!("invalid row count '{rows}'"))?;
    let cols = cols
        .trim()
        .parse()
        .map_err(|_| format!("invalid column count '{cols}'"))?;
    Ok((rows, cols))
}

/// Parse a comma-separated list of frame indices.
pub fn parse_frames(s: &str) -> Result<Vec<usize>> {
    let frames = s
        .split(',')
        .map(|t| {
            t.trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid frame index '{}'", t.trim()))
        })
        .collect::<Result<Vec<_>>>()?;
    if frames.is_empty() {
        bail!("Frame list is empty");
    }
    Ok(frames)
}
