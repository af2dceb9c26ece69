use faer::{prelude::SpSolver, Mat, MatRef};

use crate::error::CPDError;

/// Squared euclidean distance between row `i` of `a` and row `j` of `b`.
#[inline]
pub(crate) fn squared_distance(a: MatRef<'_, f64>, i: usize, b: MatRef<'_, f64>, j: usize) -> f64 {
    debug_assert_eq!(a.ncols(), b.ncols());
    (0..a.ncols())
        .map(|k| {
            let diff = a.read(i, k) - b.read(j, k);
            diff * diff
        })
        .sum()
}

/// Compute the matrix of pairwise squared distances between the rows of `a` and `b`.
///
/// # Returns
///
/// A matrix with shape (a.nrows(), b.nrows()).
pub(crate) fn squared_distances(a: MatRef<'_, f64>, b: MatRef<'_, f64>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), b.nrows(), |i, j| squared_distance(a, i, b, j))
}

/// Compute `trace(a^T diag(weights) b)` for two matrices of the same shape.
///
/// Passing `None` as weights computes the plain Frobenius inner product `trace(a^T b)`.
pub(crate) fn weighted_inner(
    a: MatRef<'_, f64>,
    b: MatRef<'_, f64>,
    weights: Option<&[f64]>,
) -> f64 {
    debug_assert_eq!(a.nrows(), b.nrows());
    debug_assert_eq!(a.ncols(), b.ncols());

    let mut acc = 0.0;
    for i in 0..a.nrows() {
        let w = weights.map_or(1.0, |w| w[i]);
        for k in 0..a.ncols() {
            acc += w * a.read(i, k) * b.read(i, k);
        }
    }
    acc
}

/// Solve the dense linear system `a * x = b` with a partial pivoting LU decomposition.
///
/// The matrix `a` is not assumed to be positive definite. The rows of the system are
/// equilibrated before the decomposition, which leaves the solution unchanged. A pivot with
/// `|pivot| <= n * f64::EPSILON * max|U|`, a zero row or a non-finite solution is reported
/// as [`CPDError::SingularSystem`].
pub(crate) fn solve_lu(a: MatRef<'_, f64>, b: MatRef<'_, f64>) -> Result<Mat<f64>, CPDError> {
    if a.nrows() != a.ncols() || a.nrows() != b.nrows() {
        return Err(CPDError::ShapeMismatch {
            name: "linear system",
            expected: (a.nrows(), a.nrows()),
            actual: (a.ncols(), b.nrows()),
        });
    }

    let n = a.nrows();

    // scale every row by its largest magnitude
    let row_scale = (0..n)
        .map(|i| (0..n).map(|j| a.read(i, j).abs()).fold(0.0, f64::max))
        .collect::<Vec<_>>();
    if row_scale.iter().any(|&s| s == 0.0 || !s.is_finite()) {
        return Err(CPDError::SingularSystem);
    }
    let a_eq = Mat::from_fn(n, n, |i, j| a.read(i, j) / row_scale[i]);
    let b_eq = Mat::from_fn(n, b.ncols(), |i, j| b.read(i, j) / row_scale[i]);

    let lu = a_eq.partial_piv_lu();

    let u = lu.compute_u();
    let mut max_u = 0.0f64;
    for j in 0..n {
        for i in 0..=j {
            max_u = max_u.max(u.read(i, j).abs());
        }
    }
    let threshold = n as f64 * f64::EPSILON * max_u;
    for i in 0..n {
        let pivot = u.read(i, i);
        if !pivot.is_finite() || pivot.abs() <= threshold {
            return Err(CPDError::SingularSystem);
        }
    }

    let x = lu.solve(b_eq.as_ref());
    for j in 0..x.ncols() {
        for i in 0..x.nrows() {
            if !x.read(i, j).is_finite() {
                return Err(CPDError::SingularSystem);
            }
        }
    }

    Ok(x)
}
