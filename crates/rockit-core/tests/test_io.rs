mod common;

use approx::assert_relative_eq;

use common::{build_ser_8bit, build_ser_header, drifting_peaks, linspace, write_temp};
use rockit_core::fit::MethodChoice;
use rockit_core::io::{save_map_previews, write_volume, RockingCurvesReport, SerReader};
use rockit_core::volume::Coordinates;
use rockit_core::{fit, FitMethod, FitOptions, RockitError};

// ---------------------------------------------------------------------------
// SER stacks
// ---------------------------------------------------------------------------

#[test]
fn test_8bit_frames_read_as_raw_counts() {
    let frames = vec![vec![0u8, 10, 20, 30, 40, 50], vec![200u8, 201, 202, 203, 204, 255]];
    let file = write_temp(&build_ser_8bit(3, 2, &frames));
    let reader = SerReader::open(file.path()).unwrap();

    assert_eq!(reader.frame_count(), 2);
    let volume = reader.read_volume().unwrap();
    assert_eq!(volume.dim(), (2, 2, 3));
    assert_eq!(volume[[0, 1, 2]], 50.0);
    assert_eq!(volume[[1, 0, 0]], 200.0);
    assert_eq!(volume[[1, 1, 2]], 255.0);

    let info = reader.source_info(file.path());
    assert_eq!(info.observer.as_deref(), Some("Beamline"));
    assert_eq!(info.instrument, None);
}

#[test]
fn test_frame_subset_in_requested_order() {
    let frames: Vec<Vec<u8>> = (0..5u8).map(|f| vec![f * 10; 4]).collect();
    let file = write_temp(&build_ser_8bit(2, 2, &frames));
    let reader = SerReader::open(file.path()).unwrap();
    let subset = reader.read_volume_frames(&[4, 1]).unwrap();
    assert_eq!(subset.dim(), (2, 2, 2));
    assert_eq!(subset[[0, 0, 0]], 40.0);
    assert_eq!(subset[[1, 1, 1]], 10.0);

    assert!(matches!(
        reader.read_volume_frames(&[5]),
        Err(RockitError::FrameIndexOutOfRange { index: 5, total: 5 })
    ));
}

#[test]
fn test_color_stack_rejected() {
    let mut data = build_ser_header(2, 2, 8, 1, 100);
    data.extend_from_slice(&[0u8; 12]);
    let file = write_temp(&data);
    assert!(matches!(
        SerReader::open(file.path()),
        Err(RockitError::UnsupportedColorMode(ref mode)) if mode == "RGB"
    ));
}

#[test]
fn test_truncated_file_rejected() {
    let mut data = build_ser_header(4, 4, 8, 3, 0);
    data.extend_from_slice(&[0u8; 20]);
    let file = write_temp(&data);
    assert!(matches!(
        SerReader::open(file.path()),
        Err(RockitError::InvalidSer(_))
    ));
}

#[test]
fn test_fit_from_written_stack() {
    let x = linspace(0.0, 10.0, 40);
    let volume = drifting_peaks(&x, 4, 5).mapv(f64::round);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.ser");
    write_volume(&path, &volume.view()).unwrap();

    let loaded = SerReader::open(&path).unwrap().read_volume().unwrap();
    assert_eq!(loaded, volume);

    let options = FitOptions {
        method: MethodChoice::Trf,
        ..Default::default()
    };
    let out = fit(&loaded.view(), &Coordinates::Axis(x), &options).unwrap();
    let center = out.maps.by_name("Peak position").unwrap();
    // Rounding to integer counts shifts the center only slightly.
    assert_relative_eq!(center[[2, 4]], 4.2, max_relative = 1e-2);
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[test]
fn test_report_json_round_trip() {
    let x = linspace(0.0, 10.0, 30);
    let volume = drifting_peaks(&x, 3, 4);
    let coords = Coordinates::Axis(x.clone());
    let options = FitOptions {
        method: MethodChoice::Lm,
        ..Default::default()
    };
    let out = fit(&volume.view(), &coords, &options).unwrap();
    let report = RockingCurvesReport::new(&out, &coords, options.int_thresh).with_source("scan.ser");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    report.write_json(&path).unwrap();
    let back = RockingCurvesReport::read_json(&path).unwrap();

    assert_eq!(back.method, FitMethod::Lm);
    assert_eq!((back.frames, back.rows, back.cols), (30, 3, 4));
    assert_eq!(back.axis_labels, vec!["position".to_string()]);
    assert_eq!(back.source.as_deref(), Some("scan.ser"));
    assert_eq!(back.summary, out.summary);
    let names: Vec<&str> = back.maps.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["Amplitude", "Peak position", "FWHM", "Background"]);

    let fwhm = back.map("FWHM").unwrap();
    let expected = out.maps.by_name("FWHM").unwrap();
    for row in 0..3 {
        for col in 0..4 {
            assert_relative_eq!(fwhm[row][col], expected[[row, col]], max_relative = 1e-12);
        }
    }
    for (a, b) in back.coordinates[0].iter().zip(&x) {
        assert_relative_eq!(*a, *b, max_relative = 1e-12);
    }
    assert!(back.residuals.is_some());
}

#[test]
fn test_map_previews_written_per_parameter() {
    let x = linspace(0.0, 10.0, 20);
    let volume = drifting_peaks(&x, 3, 3);
    let out = fit(
        &volume.view(),
        &Coordinates::Axis(x),
        &FitOptions {
            method: MethodChoice::Lm,
            ..Default::default()
        },
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let written = save_map_previews(&out.maps, out.residuals.as_ref(), dir.path(), "scan").unwrap();
    assert_eq!(written.len(), 5);
    assert!(dir.path().join("scan_peak_position.tif").exists());
    assert!(dir.path().join("scan_residuals.tif").exists());
    let img = image::open(dir.path().join("scan_fwhm.tif")).unwrap();
    assert_eq!((img.width(), img.height()), (3, 3));
}

// ---------------------------------------------------------------------------
// Configuration files
// ---------------------------------------------------------------------------

#[test]
fn test_default_options_toml_round_trip() {
    let defaults = FitOptions::default();
    let text = toml::to_string_pretty(&defaults).unwrap();
    assert!(text.contains("method = \"auto\""));
    let back: FitOptions = toml::from_str(&text).unwrap();
    assert_eq!(back, defaults);
}

#[test]
fn test_unknown_method_in_toml_rejected() {
    let result: Result<FitOptions, _> = toml::from_str("method = \"simplex\"");
    assert!(result.is_err());
}
