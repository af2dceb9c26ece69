use std::f64::consts::PI;

use faer::{Mat, MatRef};

use crate::{error::CPDError, ops};

/// Structure to define the Expectation-Maximization parameters.
#[derive(Debug, Clone)]
pub struct EMParams {
    /// Maximum number of iterations to perform.
    pub max_iterations: usize,
    /// Convergence tolerance as the difference in variance between two consecutive iterations.
    pub tolerance: f64,
    /// Weight of the uniform distribution modelling outliers, in the range [0, 1).
    pub w: f64,
    /// Initial variance. Estimated from the point sets when not given.
    pub sigma2: Option<f64>,
}

impl Default for EMParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-3,
            w: 0.0,
            sigma2: None,
        }
    }
}

/// Result of the Expectation-Maximization loop.
#[derive(Debug, Clone)]
pub struct EMResult {
    /// The total number of iterations performed.
    pub num_iterations: usize,
    /// The last computed variance.
    pub sigma2: f64,
    /// The last absolute change of the variance.
    pub err: f64,
    /// Whether the change of the variance dropped below the tolerance.
    pub converged: bool,
}

/// State of the registration reported after every iteration.
#[derive(Debug)]
pub struct IterationInfo<'a> {
    /// Number of iterations performed so far.
    pub iteration: usize,
    /// Current variance.
    pub sigma2: f64,
    /// Current absolute change of the variance.
    pub err: f64,
    /// Current transformed source points with shape (M, D).
    pub transformed: MatRef<'a, f64>,
}

/// Transform model driven by the Expectation-Maximization loop.
///
/// The loop calls the operations once per iteration in the order
/// [`EMTransform::update_transform`], [`EMTransform::transform_point_cloud`] and
/// [`EMTransform::update_variance`].
pub trait EMTransform {
    /// Re-estimate the transform parameters from the current correspondences.
    fn update_transform(&mut self, ctx: &EMContext) -> Result<(), CPDError>;

    /// Apply the current transform to the source points and store the result.
    fn transform_point_cloud(&mut self, ctx: &EMContext) -> Result<(), CPDError>;

    /// Re-estimate the variance of the mixture model and store it in the context.
    fn update_variance(&self, ctx: &mut EMContext) -> Result<(), CPDError>;

    /// The source points transformed by the last call to [`EMTransform::transform_point_cloud`].
    fn transformed_points(&self) -> MatRef<'_, f64>;
}

/// Shared state of a Coherent Point Drift registration run.
///
/// Owns the target and source point sets, the soft correspondences and the variance of the
/// Gaussian mixture model.
#[derive(Debug, Clone)]
pub struct EMContext {
    // target points (N, D)
    target: Mat<f64>,
    // source points (M, D)
    source: Mat<f64>,
    max_iterations: usize,
    tolerance: f64,
    w: f64,
    sigma2: f64,
    err: f64,
    // correspondence probabilities (M, N)
    p: Mat<f64>,
    // row sums of p (M)
    p1: Vec<f64>,
    // column sums of p (N)
    pt1: Vec<f64>,
    np: f64,
}

impl EMContext {
    /// Create a new registration context.
    ///
    /// # Arguments
    ///
    /// * `target` - The fixed points with shape (N, D).
    /// * `source` - The moving points with shape (M, D).
    /// * `params` - Expectation-Maximization parameters.
    pub fn new(target: Mat<f64>, source: Mat<f64>, params: &EMParams) -> Result<Self, CPDError> {
        if target.nrows() == 0 {
            return Err(CPDError::EmptyPointSet("target"));
        }
        if source.nrows() == 0 {
            return Err(CPDError::EmptyPointSet("source"));
        }
        if target.ncols() != source.ncols() {
            return Err(CPDError::DimensionMismatch {
                target_dim: target.ncols(),
                source_dim: source.ncols(),
            });
        }
        if params.max_iterations == 0 {
            return Err(CPDError::InvalidParameter {
                name: "max_iterations",
                value: params.max_iterations as f64,
            });
        }
        if !(params.tolerance > 0.0 && params.tolerance.is_finite()) {
            return Err(CPDError::InvalidParameter {
                name: "tolerance",
                value: params.tolerance,
            });
        }
        if !(0.0..1.0).contains(&params.w) {
            return Err(CPDError::InvalidParameter {
                name: "w",
                value: params.w,
            });
        }

        let sigma2 = match params.sigma2 {
            Some(sigma2) if sigma2 > 0.0 && sigma2.is_finite() => sigma2,
            Some(sigma2) => {
                return Err(CPDError::InvalidParameter {
                    name: "sigma2",
                    value: sigma2,
                })
            }
            None => {
                let sigma2 = initialize_sigma2(target.as_ref(), source.as_ref());
                if !sigma2.is_finite() {
                    return Err(CPDError::InvalidParameter {
                        name: "sigma2",
                        value: sigma2,
                    });
                } else if sigma2 > 0.0 {
                    sigma2
                } else {
                    log::debug!("Degenerate initial variance, using {}", params.tolerance / 10.0);
                    params.tolerance / 10.0
                }
            }
        };

        let (num_source, num_target) = (source.nrows(), target.nrows());

        Ok(Self {
            target,
            source,
            max_iterations: params.max_iterations,
            tolerance: params.tolerance,
            w: params.w,
            sigma2,
            err: f64::INFINITY,
            p: Mat::zeros(num_source, num_target),
            p1: vec![0.0; num_source],
            pt1: vec![0.0; num_target],
            np: 0.0,
        })
    }

    /// Get as reference the target points (N, D).
    pub fn target(&self) -> MatRef<'_, f64> {
        self.target.as_ref()
    }

    /// Get as reference the source points (M, D).
    pub fn source(&self) -> MatRef<'_, f64> {
        self.source.as_ref()
    }

    /// Number of target points N.
    #[inline]
    pub fn num_target(&self) -> usize {
        self.target.nrows()
    }

    /// Number of source points M.
    #[inline]
    pub fn num_source(&self) -> usize {
        self.source.nrows()
    }

    /// Dimension D of the points.
    #[inline]
    pub fn dim(&self) -> usize {
        self.target.ncols()
    }

    /// Maximum number of iterations of the registration loop.
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Convergence tolerance on the change of the variance.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Weight of the outlier distribution.
    pub fn w(&self) -> f64 {
        self.w
    }

    /// Current variance of the mixture model.
    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    /// Absolute change of the variance in the last update.
    pub fn err(&self) -> f64 {
        self.err
    }

    /// Correspondence probabilities with shape (M, N).
    pub fn p(&self) -> MatRef<'_, f64> {
        self.p.as_ref()
    }

    /// Row sums of the correspondence matrix (M).
    pub fn p1(&self) -> &[f64] {
        &self.p1
    }

    /// Column sums of the correspondence matrix (N).
    pub fn pt1(&self) -> &[f64] {
        &self.pt1
    }

    /// Total expected number of matched points.
    pub fn np(&self) -> f64 {
        self.np
    }

    /// Store a new variance estimate and record its absolute change.
    ///
    /// The variance must be strictly positive and finite.
    pub fn set_sigma2(&mut self, sigma2: f64) -> Result<(), CPDError> {
        if !(sigma2 > 0.0 && sigma2.is_finite()) {
            return Err(CPDError::InvalidParameter {
                name: "sigma2",
                value: sigma2,
            });
        }
        self.err = (sigma2 - self.sigma2).abs();
        self.sigma2 = sigma2;
        Ok(())
    }

    /// Replace the correspondence matrix and recompute its marginals.
    ///
    /// # Arguments
    ///
    /// * `p` - Correspondence probabilities with shape (M, N). Entries must be finite and
    ///   non-negative.
    pub fn set_correspondences(&mut self, p: Mat<f64>) -> Result<(), CPDError> {
        let expected = (self.num_source(), self.num_target());
        if (p.nrows(), p.ncols()) != expected {
            return Err(CPDError::ShapeMismatch {
                name: "P",
                expected,
                actual: (p.nrows(), p.ncols()),
            });
        }

        for j in 0..p.ncols() {
            for i in 0..p.nrows() {
                let value = p.read(i, j);
                if !(value >= 0.0 && value.is_finite()) {
                    return Err(CPDError::InvalidParameter { name: "P", value });
                }
            }
        }

        self.p1 = (0..p.nrows())
            .map(|i| (0..p.ncols()).map(|j| p.read(i, j)).sum())
            .collect();
        self.pt1 = (0..p.ncols())
            .map(|j| (0..p.nrows()).map(|i| p.read(i, j)).sum())
            .collect();
        self.np = self.p1.iter().sum();
        self.p = p;

        Ok(())
    }

    /// Expectation step: compute the soft correspondences between the transformed source
    /// points and the target points under the current variance.
    ///
    /// # Arguments
    ///
    /// * `transformed` - The transformed source points with shape (M, D).
    pub fn expectation(&mut self, transformed: MatRef<'_, f64>) -> Result<(), CPDError> {
        let expected = (self.num_source(), self.dim());
        if (transformed.nrows(), transformed.ncols()) != expected {
            return Err(CPDError::ShapeMismatch {
                name: "transformed points",
                expected,
                actual: (transformed.nrows(), transformed.ncols()),
            });
        }

        let (num_source, num_target) = (self.num_source() as f64, self.num_target() as f64);
        let dim = self.dim() as f64;

        // constant of the uniform outlier distribution
        let c = (2.0 * PI * self.sigma2).powf(dim / 2.0) * self.w / (1.0 - self.w) * num_source
            / num_target;

        let mut p = ops::squared_distances(transformed, self.target.as_ref());
        for j in 0..p.ncols() {
            let mut den = 0.0;
            for i in 0..p.nrows() {
                let value = (-p.read(i, j) / (2.0 * self.sigma2)).exp();
                p.write(i, j, value);
                den += value;
            }
            let den = den.max(f64::EPSILON) + c;
            for i in 0..p.nrows() {
                p.write(i, j, p.read(i, j) / den);
            }
        }

        self.set_correspondences(p)
    }
}

/// Initial variance of the mixture model from the mean squared distance between all pairs of
/// target and source points.
pub fn initialize_sigma2(target: MatRef<'_, f64>, source: MatRef<'_, f64>) -> f64 {
    let (num_target, num_source, dim) = (target.nrows(), source.nrows(), target.ncols());
    let mut sum = 0.0;
    for i in 0..num_source {
        for j in 0..num_target {
            sum += ops::squared_distance(source, i, target, j);
        }
    }
    sum / (dim * num_source * num_target) as f64
}

/// Run the Expectation-Maximization registration loop.
///
/// See [`register_with_callback`].
pub fn register<T: EMTransform>(ctx: &mut EMContext, model: &mut T) -> Result<EMResult, CPDError> {
    register_with_callback(ctx, model, |_| {})
}

/// Run the Expectation-Maximization registration loop reporting every iteration.
///
/// The loop alternates the expectation step with the maximization step of the model until the
/// change of the variance drops below the tolerance or the maximum number of iterations is
/// reached. A failure of the model aborts the registration.
///
/// # Arguments
///
/// * `ctx` - The registration context with the point sets and the variance.
/// * `model` - The transform model to fit.
/// * `callback` - Called after every iteration with the current state.
///
/// # Returns
///
/// * `result` - The number of iterations and the final variance.
pub fn register_with_callback<T, F>(
    ctx: &mut EMContext,
    model: &mut T,
    mut callback: F,
) -> Result<EMResult, CPDError>
where
    T: EMTransform,
    F: FnMut(&IterationInfo<'_>),
{
    model.transform_point_cloud(ctx)?;

    let mut num_iterations = 0;
    while num_iterations < ctx.max_iterations() && ctx.err() > ctx.tolerance() {
        // NOTE: for debugging purposes, we measure the time taken for each iteration
        log::debug!("Iteration: {}", num_iterations);
        let now = std::time::Instant::now();

        ctx.expectation(model.transformed_points())?;

        model.update_transform(ctx)?;
        model.transform_point_cloud(ctx)?;
        model.update_variance(ctx)?;

        num_iterations += 1;

        log::debug!("sigma2: {} err: {} np: {}", ctx.sigma2(), ctx.err(), ctx.np());

        callback(&IterationInfo {
            iteration: num_iterations,
            sigma2: ctx.sigma2(),
            err: ctx.err(),
            transformed: model.transformed_points(),
        });

        log::debug!("elapsed: {:?}", now.elapsed());
    }

    let converged = ctx.err() <= ctx.tolerance();
    if converged {
        log::debug!(
            "CPD converged in {} iterations with sigma2 {}",
            num_iterations,
            ctx.sigma2()
        );
    }

    Ok(EMResult {
        num_iterations,
        sigma2: ctx.sigma2(),
        err: ctx.err(),
        converged,
    })
}
