use faer::{Mat, MatRef};

use crate::{error::CPDError, ops::squared_distance};

/// Compute the Gaussian affinity matrix of a point set.
///
/// Each entry is `G[i][j] = exp(-||Y_i - Y_j||^2 / (2 * beta^2))`. The matrix is symmetric,
/// positive semi-definite and has a unit diagonal. It encodes the smoothness prior of the
/// displacement field in the Coherent Point Drift registration.
///
/// # Arguments
///
/// * `points` - The source points with shape (M, D).
/// * `beta` - The kernel bandwidth. Must be strictly positive.
///
/// # Returns
///
/// The kernel matrix with shape (M, M).
///
/// Example:
///
/// ```
/// use kornia_cpd::{kernel::gaussian_kernel, utils::points_to_mat};
///
/// let points = points_to_mat(&[[0.0, 0.0], [1.0, 0.0]]);
/// let g = gaussian_kernel(points.as_ref(), 1.0).unwrap();
/// assert_eq!(g.read(0, 0), 1.0);
/// assert!((g.read(0, 1) - (-0.5f64).exp()).abs() < 1e-12);
/// ```
pub fn gaussian_kernel(points: MatRef<'_, f64>, beta: f64) -> Result<Mat<f64>, CPDError> {
    if !(beta > 0.0 && beta.is_finite()) {
        return Err(CPDError::InvalidParameter { name: "beta", value: beta });
    }

    if points.nrows() == 0 {
        return Err(CPDError::EmptyPointSet("source"));
    }

    let num_points = points.nrows();
    let denom = 2.0 * beta * beta;

    // fill the upper triangle and mirror it so that the symmetry is exact
    let mut kernel = Mat::<f64>::zeros(num_points, num_points);
    for i in 0..num_points {
        kernel.write(i, i, 1.0);
        for j in (i + 1)..num_points {
            let value = (-squared_distance(points, i, points, j) / denom).exp();
            kernel.write(i, j, value);
            kernel.write(j, i, value);
        }
    }

    Ok(kernel)
}
