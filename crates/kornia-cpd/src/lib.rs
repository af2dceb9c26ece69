#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Deformable transform model of the Coherent Point Drift.
pub mod deformable;
pub use deformable::{register_deformable, DeformableParams, DeformableResult, DeformableTransform};

/// Expectation-Maximization registration loop.
pub mod em;
pub use em::{EMContext, EMParams, EMResult, EMTransform};

mod error;
pub use error::CPDError;

/// Gaussian kernel construction.
pub mod kernel;

mod ops;

/// Conversion utilities between point arrays and matrices.
pub mod utils;
