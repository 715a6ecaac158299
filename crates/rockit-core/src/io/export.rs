use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RockitError};
use crate::fit::{FitMethod, ModelKind};
use crate::maps::{FitSummary, ParameterMaps};
use crate::pipeline::FitOutput;
use crate::volume::Coordinates;

/// One named parameter map, stored row by row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedMap {
    pub name: String,
    pub values: Vec<Vec<f64>>,
}

/// Serializable payload of a fit: parameter maps plus the metadata needed
/// to interpret them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RockingCurvesReport {
    pub model: ModelKind,
    pub method: FitMethod,
    pub int_thresh: f64,
    pub frames: usize,
    pub rows: usize,
    pub cols: usize,
    /// Name of each coordinate dimension.
    pub axis_labels: Vec<String>,
    /// Per-frame coordinate values, one sequence per dimension.
    pub coordinates: Vec<Vec<f64>>,
    /// Maps in parameter order.
    pub maps: Vec<NamedMap>,
    pub residuals: Option<Vec<Vec<f64>>>,
    pub summary: FitSummary,
    pub source: Option<String>,
}

impl RockingCurvesReport {
    pub fn new(output: &FitOutput, coords: &Coordinates, int_thresh: f64) -> Self {
        let (frames, rows, cols) = output.curves.dim();
        let (axis_labels, coordinates) = match coords {
            Coordinates::FrameIndex => (vec!["frame".to_string()], vec![coords.axis_values(frames)]),
            Coordinates::Axis(values) => (vec!["position".to_string()], vec![values.clone()]),
            Coordinates::Grid { x, y, .. } => (
                vec!["x".to_string(), "y".to_string()],
                vec![x.clone(), y.clone()],
            ),
        };
        let maps = output
            .maps
            .planes()
            .map(|(name, plane)| NamedMap {
                name: name.to_string(),
                values: rows_of(&plane),
            })
            .collect();

        Self {
            model: output.maps.kind(),
            method: output.method,
            int_thresh,
            frames,
            rows,
            cols,
            axis_labels,
            coordinates,
            maps,
            residuals: output.residuals.as_ref().map(|r| rows_of(&r.view())),
            summary: output.summary,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Values of the map called `name`.
    pub fn map(&self, name: &str) -> Option<&[Vec<f64>]> {
        self.maps
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.values.as_slice())
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        debug!(path = %path.display(), maps = self.maps.len(), "Wrote fit report");
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn rows_of(plane: &ArrayView2<'_, f64>) -> Vec<Vec<f64>> {
    plane.outer_iter().map(|row| row.to_vec()).collect()
}

/// Save a plane as a 16-bit grayscale TIFF, stretched so its finite
/// minimum maps to 0 and maximum to 65535. Non-finite values become 0.
pub fn save_plane_tiff(plane: &ArrayView2<'_, f64>, path: &Path) -> Result<()> {
    let (h, w) = plane.dim();
    let (lo, hi) = plane
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = hi - lo;

    let pixels: Vec<u16> = plane
        .iter()
        .map(|&v| {
            if !v.is_finite() || !(span > 0.0) {
                0
            } else {
                (((v - lo) / span).clamp(0.0, 1.0) * 65535.0) as u16
            }
        })
        .collect();

    let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| RockitError::ShapeMismatch {
            left: vec![h, w],
            right: vec![plane.len()],
        })?;
    img.save(path)?;
    Ok(())
}

/// Write one TIFF preview per parameter map into `dir`, named
/// `{stem}_{parameter}.tif`. Returns the written paths.
pub fn save_map_previews(
    maps: &ParameterMaps,
    residuals: Option<&Array2<f64>>,
    dir: &Path,
    stem: &str,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(maps.n_params() + 1);
    for (name, plane) in maps.planes() {
        let path = dir.join(format!("{stem}_{}.tif", slug(name)));
        save_plane_tiff(&plane, &path)?;
        written.push(path);
    }
    if let Some(residuals) = residuals {
        let path = dir.join(format!("{stem}_residuals.tif"));
        save_plane_tiff(&residuals.view(), &path)?;
        written.push(path);
    }
    debug!(count = written.len(), dir = %dir.display(), "Saved map previews");
    Ok(written)
}

/// `"Peak position x"` -> `"peak_position_x"`.
fn slug(name: &str) -> String {
    name.to_ascii_lowercase().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn slug_lowercases_and_joins() {
        assert_eq!(slug("Peak position x"), "peak_position_x");
        assert_eq!(slug("FWHM"), "fwhm");
    }

    #[test]
    fn preview_is_min_max_stretched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plane.tif");
        let plane = array![[10.0, 20.0], [f64::NAN, 15.0]];
        save_plane_tiff(&plane.view(), &path).unwrap();

        let img = image::open(&path).unwrap().into_luma16();
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(1, 0).0[0], 65535);
        assert_eq!(img.get_pixel(0, 1).0[0], 0);
        assert_eq!(img.get_pixel(1, 1).0[0], 32767);
    }

    #[test]
    fn constant_plane_saves_black() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.tif");
        let plane = Array2::from_elem((3, 3), 7.0);
        save_plane_tiff(&plane.view(), &path).unwrap();
        let img = image::open(&path).unwrap().into_luma16();
        assert!(img.pixels().all(|p| p.0[0] == 0));
    }
}
