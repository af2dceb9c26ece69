/// Error types for the Coherent Point Drift registration.
#[derive(Debug, thiserror::Error)]
pub enum CPDError {
    /// A scalar parameter is outside of its valid range.
    #[error("Invalid value for parameter `{name}`: {value}")]
    InvalidParameter {
        /// Name of the offending parameter.
        name: &'static str,
        /// Value that was rejected.
        value: f64,
    },

    /// A point set has no points.
    #[error("Point set `{0}` is empty")]
    EmptyPointSet(&'static str),

    /// The target and source point sets live in different spaces.
    #[error("Target points have dimension {target_dim} but source points have dimension {source_dim}")]
    DimensionMismatch {
        /// Dimension of the target points.
        target_dim: usize,
        /// Dimension of the source points.
        source_dim: usize,
    },

    /// A matrix or vector does not have the shape required by the registration.
    #[error("Shape mismatch for `{name}`: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Label of the offending matrix or vector.
        name: &'static str,
        /// Expected (rows, cols).
        expected: (usize, usize),
        /// Actual (rows, cols).
        actual: (usize, usize),
    },

    /// The weight update system has no unique solution.
    #[error("Linear system is singular to working precision")]
    SingularSystem,
}
