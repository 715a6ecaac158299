mod common;

use approx::assert_relative_eq;
use ndarray::Array3;

use common::{gaussian_1d, gaussian_2d, linspace, rel_err};
use rockit_core::consts::FWHM_FACTOR;
use rockit_core::fit::{FitStatus, MethodChoice};
use rockit_core::volume::Coordinates;
use rockit_core::{fit_2d_rocking_curve, fit_rocking_curve, fit_with_values, FitMethod, RockitError};

// ---------------------------------------------------------------------------
// Single curves
// ---------------------------------------------------------------------------

#[test]
fn test_reference_peak_with_lm() {
    let x = linspace(0.0, 10.0, 100);
    let y = gaussian_1d(&x, 50.0, 5.0, 1.5, 10.0);
    let fit = fit_rocking_curve(&y, Some(&x), Some(15.0), FitMethod::Lm).unwrap();

    assert_eq!(fit.status, FitStatus::Fitted);
    assert!(rel_err(fit.params[0], 50.0) < 0.01);
    assert!(rel_err(fit.params[1], 5.0) < 0.01);
    assert!(rel_err(fit.params[2], 1.5 * FWHM_FACTOR) < 0.01);
    assert!(rel_err(fit.params[3], 10.0) < 0.01);
    for (model, data) in fit.curve.iter().zip(&y) {
        assert_relative_eq!(*model, *data, epsilon = 1e-6);
    }
}

#[test]
fn test_all_methods_recover_exact_gaussian() {
    let x = linspace(-2.0, 3.0, 80);
    let truth = [140.0, 0.7, 0.45, 25.0];
    let y = gaussian_1d(&x, truth[0], truth[1], truth[2], truth[3]);
    for method in FitMethod::ALL {
        let fit = fit_rocking_curve(&y, Some(&x), None, method).unwrap();
        assert_eq!(fit.status, FitStatus::Fitted, "{method}");
        assert!(rel_err(fit.params[0], truth[0]) < 1e-3, "{method}: {:?}", fit.params);
        assert!(rel_err(fit.params[1], truth[1]) < 1e-3, "{method}: {:?}", fit.params);
        assert!(
            rel_err(fit.params[2], truth[2] * FWHM_FACTOR) < 1e-3,
            "{method}: {:?}",
            fit.params
        );
        assert!(rel_err(fit.params[3], truth[3]) < 1e-3, "{method}: {:?}", fit.params);
    }
}

#[test]
fn test_frame_index_used_without_coordinates() {
    let x: Vec<f64> = (0..60).map(|i| i as f64).collect();
    let y = gaussian_1d(&x, 300.0, 22.0, 4.0, 50.0);
    let fit = fit_rocking_curve(&y, None, None, FitMethod::Trf).unwrap();
    assert!(rel_err(fit.params[1], 22.0) < 1e-3);
    assert!(rel_err(fit.params[2], 4.0 * FWHM_FACTOR) < 1e-3);
}

#[test]
fn test_flat_curve_skips_optimizer() {
    let y = vec![20.0, 21.0, 20.5, 19.0, 20.0, 22.0, 20.0];
    let fit = fit_rocking_curve(&y, None, Some(15.0), FitMethod::Lm).unwrap();
    assert_eq!(fit.status, FitStatus::Flat);
    assert_eq!(fit.params[0], 0.0);
    assert_eq!(fit.params[2], 0.0);
    assert_relative_eq!(fit.params[3], 20.357142857142858, epsilon = 1e-9);
    assert!(fit.curve.iter().all(|&v| v == fit.params[3]));
}

#[test]
fn test_constant_curve_is_flat_even_without_threshold() {
    let y = vec![7.0; 12];
    let fit = fit_rocking_curve(&y, None, Some(0.0), FitMethod::Dogbox).unwrap();
    assert_eq!(fit.status, FitStatus::Flat);
    assert_eq!(fit.params[3], 7.0);
}

#[test]
fn test_coordinate_length_mismatch_is_rejected() {
    let y = vec![1.0; 10];
    let x = linspace(0.0, 1.0, 9);
    let err = fit_rocking_curve(&y, Some(&x), None, FitMethod::Lm).unwrap_err();
    assert!(err.is_config_error());
}

#[test]
fn test_empty_curve_is_rejected() {
    for method in FitMethod::ALL {
        let err = fit_rocking_curve(&[], None, None, method).unwrap_err();
        assert!(matches!(err, RockitError::EmptyVolume), "{method}: {err}");
    }
    let err = fit_rocking_curve(&[], Some(&[]), Some(0.0), FitMethod::Lm).unwrap_err();
    assert!(matches!(err, RockitError::EmptyVolume));
}

// ---------------------------------------------------------------------------
// 2D curves
// ---------------------------------------------------------------------------

fn grid_coordinates() -> (Vec<f64>, Vec<f64>, (usize, usize)) {
    match Coordinates::grid_from_axes(&linspace(-3.0, 3.0, 15), &linspace(-2.0, 2.0, 11)) {
        Coordinates::Grid { x, y, shape } => (x, y, shape),
        other => panic!("expected grid, got {other:?}"),
    }
}

#[test]
fn test_2d_peak_recovered() {
    let (x, y, shape) = grid_coordinates();
    let truth = [120.0, 0.5, -0.3, 0.8, 0.6, 0.3, 5.0];
    let values = gaussian_2d(
        &x, &y, truth[0], truth[1], truth[2], truth[3], truth[4], truth[5], truth[6],
    );

    for method in [FitMethod::Lm, FitMethod::Trf] {
        let fit = fit_2d_rocking_curve(&values, &x, &y, shape, None, method).unwrap();
        assert_eq!(fit.status, FitStatus::Fitted, "{method}");
        assert_eq!(fit.params.len(), 7);
        assert!(rel_err(fit.params[0], truth[0]) < 1e-3, "{method}: {:?}", fit.params);
        assert!(rel_err(fit.params[1], truth[1]) < 1e-3, "{method}: {:?}", fit.params);
        assert!(rel_err(fit.params[2], truth[2]) < 1e-3, "{method}: {:?}", fit.params);
        assert!(rel_err(fit.params[3], truth[3] * FWHM_FACTOR) < 1e-3);
        assert!(rel_err(fit.params[4], truth[4] * FWHM_FACTOR) < 1e-3);
        assert!(rel_err(fit.params[5], truth[5]) < 1e-3, "{method}: {:?}", fit.params);
        assert!(rel_err(fit.params[6], truth[6]) < 1e-3, "{method}: {:?}", fit.params);
    }
}

#[test]
fn test_2d_flat_curve() {
    let (x, y, shape) = grid_coordinates();
    let values = vec![40.0; x.len()];
    let fit = fit_2d_rocking_curve(&values, &x, &y, shape, None, FitMethod::Dogbox).unwrap();
    assert_eq!(fit.status, FitStatus::Flat);
    assert_eq!(fit.params[0], 0.0);
    assert_eq!(fit.params[6], 40.0);
}

#[test]
fn test_2d_empty_curve_is_rejected() {
    let err = fit_2d_rocking_curve(&[], &[], &[], (0, 0), None, FitMethod::Trf).unwrap_err();
    assert!(matches!(err, RockitError::EmptyVolume));
}

#[test]
fn test_2d_volume_through_pipeline() {
    let x_axis = linspace(-3.0, 3.0, 9);
    let y_axis = linspace(-2.0, 2.0, 7);
    let (x, y, shape) = match Coordinates::grid_from_axes(&x_axis, &y_axis) {
        Coordinates::Grid { x, y, shape } => (x, y, shape),
        other => panic!("expected grid, got {other:?}"),
    };
    let frames = x.len();
    let mut volume = Array3::zeros((frames, 2, 2));
    for row in 0..2 {
        for col in 0..2 {
            let cx = -0.5 + 0.5 * col as f64;
            let curve = gaussian_2d(&x, &y, 90.0, cx, 0.2, 0.9, 0.7, 0.0, 10.0);
            for (f, v) in curve.into_iter().enumerate() {
                volume[[f, row, col]] = v;
            }
        }
    }

    // Axis ticks are expanded to the grid, slow axis first.
    let out = fit_with_values(
        &volume.view(),
        vec![y_axis.clone(), x_axis.clone()],
        Some(shape),
        15.0,
        "trf",
    )
    .unwrap();

    assert_eq!(out.method, FitMethod::Trf);
    assert_eq!(out.curves.dim(), (frames, 2, 2));
    assert_eq!(out.maps.n_params(), 7);
    assert_eq!(out.maps.names()[5], "Correlation");
    let cx = out.maps.by_name("Peak position x").unwrap();
    assert_relative_eq!(cx[[1, 0]], -0.5, epsilon = 1e-4);
    assert_relative_eq!(cx[[1, 1]], 0.0, epsilon = 1e-4);
    assert_eq!(out.summary.fitted, 4);
}

#[test]
fn test_method_choice_parsing() {
    assert_eq!("auto".parse::<MethodChoice>().unwrap(), MethodChoice::Auto);
    assert_eq!("TRF".parse::<MethodChoice>().unwrap(), MethodChoice::Trf);
    assert!("newton".parse::<FitMethod>().is_err());
}
