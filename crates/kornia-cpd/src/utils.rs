use faer::{Mat, MatRef};

use crate::error::CPDError;

/// Utility function to convert a set of D-dimensional points to a faer matrix.
///
/// # Arguments
///
/// * `points` - A set of points.
///
/// # Returns
///
/// A faer matrix with one point per row.
pub fn points_to_mat<const D: usize>(points: &[[f64; D]]) -> Mat<f64> {
    Mat::from_fn(points.len(), D, |i, j| points[i][j])
}

/// Utility function to convert a faer matrix with one point per row to a set of points.
///
/// # Arguments
///
/// * `mat` - A matrix with shape (N, D).
///
/// # Returns
///
/// The rows of the matrix as D-dimensional points.
pub fn mat_to_points<const D: usize>(mat: MatRef<'_, f64>) -> Result<Vec<[f64; D]>, CPDError> {
    if mat.ncols() != D {
        return Err(CPDError::ShapeMismatch {
            name: "points",
            expected: (mat.nrows(), D),
            actual: (mat.nrows(), mat.ncols()),
        });
    }

    Ok((0..mat.nrows())
        .map(|i| std::array::from_fn(|j| mat.read(i, j)))
        .collect())
}
