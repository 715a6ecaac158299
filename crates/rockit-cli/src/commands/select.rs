use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use rockit_core::io::SerReader;
use rockit_core::select::analyze_volume;

use super::{load_options, parse_frames};

#[derive(Args)]
pub struct SelectArgs {
    /// Input SER file
    pub file: PathBuf,

    /// Fit options file (TOML); only the [selector] table is used
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of curves to sample
    #[arg(long)]
    pub sample_size: Option<usize>,

    /// Seed for reproducible sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Comma-separated frame indices to analyze (default: all)
    #[arg(long)]
    pub frames: Option<String>,
}

pub fn run(args: &SelectArgs) -> Result<()> {
    let mut selector = load_options(args.config.as_deref())?.selector;
    if let Some(n) = args.sample_size {
        selector.sample_size = n;
    }
    if args.seed.is_some() {
        selector.seed = args.seed;
    }

    let reader = SerReader::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let volume = match args.frames {
        Some(ref list) => reader.read_volume_frames(&parse_frames(list)?)?,
        None => reader.read_volume()?,
    };

    let stats = analyze_volume(&volume.view(), &selector).context("Method analysis failed")?;
    let method = stats.recommend(&selector);

    println!("Sampled curves:       {}", stats.sampled);
    println!("Frames per curve:     {}", stats.frames);
    println!("Noise estimate:       {:.3}", stats.noise);
    println!("Reference amplitude:  {:.3}", stats.reference_amplitude);
    println!("Mean peak width:      {:.2} frames", stats.width);
    println!("Recommended method:   {}", method);

    Ok(())
}
