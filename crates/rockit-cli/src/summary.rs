use std::path::{Path, PathBuf};
use std::time::Duration;

use console::Style;
use rockit_core::volume::Coordinates;
use rockit_core::{FitOptions, FitOutput};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_fit_header(
    input: &Path,
    output: &Path,
    (frames, rows, cols): (usize, usize, usize),
    coords: &Coordinates,
    options: &FitOptions,
) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Rocking Curve Fit"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(17)));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Input"),
        s.path.apply_to(input.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(output.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Volume"),
        s.value.apply_to(format!("{frames} frames, {rows}x{cols} pixels"))
    );
    let axis = match coords {
        Coordinates::FrameIndex => "frame index".to_string(),
        Coordinates::Axis(_) => "1D positions".to_string(),
        Coordinates::Grid { shape, .. } => format!("2D grid {}x{}", shape.0, shape.1),
    };
    println!("  {:<14}{}", s.label.apply_to("Coordinates"), s.value.apply_to(axis));
    println!();

    println!("  {}", s.header.apply_to("Fitting"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Method"),
        s.method.apply_to(options.method)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Threshold"),
        s.value.apply_to(options.int_thresh)
    );
    if options.use_optimizations {
        let workers = options
            .workers
            .map(|w| w.to_string())
            .unwrap_or_else(|| "auto".into());
        println!(
            "    {:<12}{}",
            s.label.apply_to("Workers"),
            s.value.apply_to(workers)
        );
    } else {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Workers"),
            s.disabled.apply_to("sequential")
        );
    }
    if !options.compute_residuals {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Residuals"),
            s.disabled.apply_to("disabled")
        );
    }
    println!();
}

pub fn print_fit_summary(
    output: &FitOutput,
    elapsed: Duration,
    report: &Path,
    previews: &[PathBuf],
    denoised: Option<&Path>,
) {
    let s = Styles::new();

    println!();
    println!("  {}", s.header.apply_to("Result"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Method"),
        s.method.apply_to(output.method)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Model"),
        s.value.apply_to(output.maps.kind())
    );
    let summary = output.summary;
    println!(
        "    {:<12}{}",
        s.label.apply_to("Pixels"),
        s.value.apply_to(format!(
            "{} fitted, {} flat, {} fallback",
            summary.fitted, summary.flat, summary.fallback
        ))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Time"),
        s.value.apply_to(format!("{:.2}s", elapsed.as_secs_f64()))
    );
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Report"),
        s.path.apply_to(report.display())
    );
    if let Some(path) = denoised {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Curves"),
            s.path.apply_to(path.display())
        );
    }
    for path in previews {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Preview"),
            s.path.apply_to(path.display())
        );
    }
    println!();
}
