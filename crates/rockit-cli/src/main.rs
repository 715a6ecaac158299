mod commands;
mod progress;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rockit", about = "Rocking curve fitting for diffraction image stacks")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show SER stack metadata
    Info(commands::info::InfoArgs),
    /// Analyze a stack and recommend a fit method
    Select(commands::select::SelectArgs),
    /// Fit every pixel's rocking curve and write the parameter maps
    Fit(commands::fit::FitArgs),
    /// Print or save the default fit options as TOML
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Info(args) => commands::info::run(args),
        Commands::Select(args) => commands::select::run(args),
        Commands::Fit(args) => commands::fit::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
