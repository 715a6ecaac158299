use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Args;
use rockit_core::fit::MethodChoice;
use rockit_core::io::{save_map_previews, write_volume, RockingCurvesReport, SerReader};
use rockit_core::volume::Coordinates;
use rockit_core::{fit_reported, FitOptions};
use tracing::info;

use super::{load_options, parse_frames, parse_grid, read_values};
use crate::progress::BarProgressReporter;
use crate::summary::{print_fit_header, print_fit_summary};

#[derive(Args)]
pub struct FitArgs {
    /// Input SER file
    pub file: PathBuf,

    /// Fit options file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Coordinate values, one per frame (whitespace-separated text file)
    #[arg(long)]
    pub values: Option<PathBuf>,

    /// Second coordinate dimension for 2D fits
    #[arg(long, requires = "values")]
    pub values2: Option<PathBuf>,

    /// Grid shape of a 2D scan as ROWSxCOLS
    #[arg(long, value_parser = parse_grid)]
    pub grid: Option<(usize, usize)>,

    /// Fit method: auto, lm, trf or dogbox
    #[arg(long)]
    pub method: Option<String>,

    /// Peak-to-peak range below which a curve is treated as flat
    #[arg(long)]
    pub int_thresh: Option<f64>,

    /// Worker threads (default: CPU count - 1)
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Comma-separated frame indices to fit (default: all)
    #[arg(long)]
    pub frames: Option<String>,

    /// Fit every pixel on one thread
    #[arg(long)]
    pub sequential: bool,

    /// Skip the residual map
    #[arg(long)]
    pub no_residuals: bool,

    /// Directory for 16-bit TIFF previews of each map
    #[arg(long)]
    pub previews: Option<PathBuf>,

    /// Write the fitted curves as a 16-bit SER stack
    #[arg(long)]
    pub denoised: Option<PathBuf>,

    /// Output report path (JSON)
    #[arg(short, long, default_value = "rocking_curves.json")]
    pub output: PathBuf,
}

pub fn run(args: &FitArgs) -> Result<()> {
    if args.output.exists() {
        bail!(
            "{} already exists; choose another output path",
            args.output.display()
        );
    }

    let options = build_options(args)?;

    let reader = SerReader::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let volume = match args.frames {
        Some(ref list) => reader.read_volume_frames(&parse_frames(list)?)?,
        None => reader.read_volume()?,
    };
    let coords = build_coordinates(args)?;

    print_fit_header(&args.file, &args.output, volume.dim(), &coords, &options);

    let reporter = Arc::new(BarProgressReporter::new()?);
    let start = Instant::now();
    let output = fit_reported(&volume.view(), &coords, &options, reporter.clone(), None)?;
    reporter.finish();
    let elapsed = start.elapsed();
    info!(elapsed_ms = elapsed.as_millis() as u64, "Fit complete");

    let report = RockingCurvesReport::new(&output, &coords, options.int_thresh)
        .with_source(args.file.display().to_string());
    report
        .write_json(&args.output)
        .with_context(|| format!("Failed to write report {}", args.output.display()))?;

    let mut previews = Vec::new();
    if let Some(ref dir) = args.previews {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let stem = args
            .file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "rockit".into());
        previews = save_map_previews(&output.maps, output.residuals.as_ref(), dir, &stem)
            .context("Failed to save map previews")?;
    }

    if let Some(ref path) = args.denoised {
        write_volume(path, &output.curves.view())
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    print_fit_summary(&output, elapsed, &args.output, &previews, args.denoised.as_deref());
    Ok(())
}

fn build_options(args: &FitArgs) -> Result<FitOptions> {
    let mut options = load_options(args.config.as_deref())?;
    if let Some(ref method) = args.method {
        options.method = method.parse::<MethodChoice>()?;
    }
    if let Some(thresh) = args.int_thresh {
        options.int_thresh = thresh;
    }
    if args.workers.is_some() {
        options.workers = args.workers;
    }
    if args.sequential {
        options.use_optimizations = false;
    }
    if args.no_residuals {
        options.compute_residuals = false;
    }
    options.validate()?;
    Ok(options)
}

fn build_coordinates(args: &FitArgs) -> Result<Coordinates> {
    let mut values = Vec::new();
    if let Some(ref path) = args.values {
        values.push(read_values(path)?);
    }
    if let Some(ref path) = args.values2 {
        values.push(read_values(path)?);
    }
    Ok(Coordinates::from_dimensions(values, args.grid)?)
}
