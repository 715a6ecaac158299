use ndarray::{Array2, ArrayView3, Axis, Zip};

use crate::error::{Result, RockitError};

/// Per-pixel `|Σ fitted − Σ original|` over the frame axis.
///
/// With `indices`, only those frames contribute to either sum. Both volumes
/// must have the same `(frames, rows, cols)` shape.
pub fn compute_residuals(
    fitted: &ArrayView3<'_, f64>,
    original: &ArrayView3<'_, f64>,
    indices: Option<&[usize]>,
) -> Result<Array2<f64>> {
    if fitted.dim() != original.dim() {
        return Err(RockitError::ShapeMismatch {
            left: fitted.shape().to_vec(),
            right: original.shape().to_vec(),
        });
    }

    let (fitted_sum, original_sum) = match indices {
        None => (fitted.sum_axis(Axis(0)), original.sum_axis(Axis(0))),
        Some(indices) => {
            let frames = fitted.dim().0;
            if let Some(&index) = indices.iter().find(|&&i| i >= frames) {
                return Err(RockitError::IndexOutOfRange { index, len: frames });
            }
            (
                fitted.select(Axis(0), indices).sum_axis(Axis(0)),
                original.select(Axis(0), indices).sum_axis(Axis(0)),
            )
        }
    };

    Ok(Zip::from(&fitted_sum)
        .and(&original_sum)
        .map_collect(|f, o| (f - o).abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn identical_volumes_have_zero_residual() {
        let data = Array3::from_shape_fn((5, 2, 2), |(f, r, c)| (f + r + c) as f64);
        let res = compute_residuals(&data.view(), &data.view(), None).unwrap();
        assert!(res.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn residual_is_absolute_integrated_difference() {
        let original = Array3::from_elem((4, 1, 2), 2.0);
        let mut fitted = original.clone();
        fitted[[0, 0, 0]] = 5.0;
        fitted[[3, 0, 1]] = 0.5;
        let res = compute_residuals(&fitted.view(), &original.view(), None).unwrap();
        assert_eq!(res[[0, 0]], 3.0);
        assert_eq!(res[[0, 1]], 1.5);
    }

    #[test]
    fn indices_restrict_frames() {
        let original = Array3::from_elem((4, 1, 1), 1.0);
        let mut fitted = original.clone();
        fitted[[0, 0, 0]] = 10.0;
        fitted[[2, 0, 0]] = 3.0;
        let res = compute_residuals(&fitted.view(), &original.view(), Some(&[1, 2])).unwrap();
        assert_eq!(res[[0, 0]], 2.0);
    }

    #[test]
    fn mismatched_shapes_and_indices_fail() {
        let a = Array3::<f64>::zeros((3, 2, 2));
        let b = Array3::<f64>::zeros((3, 2, 3));
        assert!(matches!(
            compute_residuals(&a.view(), &b.view(), None),
            Err(RockitError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            compute_residuals(&a.view(), &a.view(), Some(&[0, 3])),
            Err(RockitError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }
}
