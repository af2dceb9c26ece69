use faer::{Mat, MatRef};

use crate::{
    em::{self, EMContext, EMParams, EMTransform},
    error::CPDError,
    kernel::gaussian_kernel,
    ops,
    utils::{mat_to_points, points_to_mat},
};

/// Parameters of the deformable transform.
#[derive(Debug, Clone)]
pub struct DeformableParams {
    /// Weight of the smoothness regularization. Must be strictly positive.
    pub alpha: f64,
    /// Bandwidth of the Gaussian kernel. Must be strictly positive.
    pub beta: f64,
}

impl Default for DeformableParams {
    fn default() -> Self {
        Self {
            alpha: 2.0,
            beta: 2.0,
        }
    }
}

/// Non-rigid transform of the Coherent Point Drift registration.
///
/// The source points are displaced by the smooth field `G * W`, where `G` is the Gaussian
/// kernel of the source points and `W` are the displacement weights re-estimated at every
/// iteration of the Expectation-Maximization loop.
#[derive(Debug, Clone)]
pub struct DeformableTransform {
    params: DeformableParams,
    // kernel matrix (M, M), fixed for the whole registration
    g: Mat<f64>,
    // displacement weights (M, D)
    w: Mat<f64>,
    // transformed source points (M, D)
    ty: Mat<f64>,
}

impl DeformableTransform {
    /// Create a new deformable transform for the source points of a registration context.
    ///
    /// The kernel matrix is built once from the source points and the weights start at zero,
    /// so the transformed points are equal to the source points.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The registration context.
    /// * `params` - The smoothness weight and kernel bandwidth.
    pub fn new(ctx: &EMContext, params: &DeformableParams) -> Result<Self, CPDError> {
        if !(params.alpha > 0.0 && params.alpha.is_finite()) {
            return Err(CPDError::InvalidParameter {
                name: "alpha",
                value: params.alpha,
            });
        }

        let g = gaussian_kernel(ctx.source(), params.beta)?;

        Ok(Self {
            params: params.clone(),
            g,
            w: Mat::zeros(ctx.num_source(), ctx.dim()),
            ty: ctx.source().to_owned(),
        })
    }

    /// Get the parameters of the transform.
    pub fn params(&self) -> &DeformableParams {
        &self.params
    }

    /// Get as reference the kernel matrix G with shape (M, M).
    pub fn kernel(&self) -> MatRef<'_, f64> {
        self.g.as_ref()
    }

    /// Get as reference the displacement weights W with shape (M, D).
    pub fn weights(&self) -> MatRef<'_, f64> {
        self.w.as_ref()
    }

    /// Get the fitted transform as the pair (G, W).
    ///
    /// The displacement of the source points is `G * W`.
    pub fn registration_parameters(&self) -> (MatRef<'_, f64>, MatRef<'_, f64>) {
        (self.g.as_ref(), self.w.as_ref())
    }

    /// Compute the displacement field `G * W` of the source points.
    pub fn displacement(&self) -> Mat<f64> {
        &self.g * &self.w
    }

    /// Apply the fitted displacement field to a set of points.
    ///
    /// The points must correspond one to one to the source points. The state of the transform
    /// is not modified.
    ///
    /// # Arguments
    ///
    /// * `points` - The points to transform with shape (M, D).
    ///
    /// # Returns
    ///
    /// The displaced points `points + G * W`.
    pub fn transform_points(&self, points: MatRef<'_, f64>) -> Result<Mat<f64>, CPDError> {
        let expected = (self.w.nrows(), self.w.ncols());
        if (points.nrows(), points.ncols()) != expected {
            return Err(CPDError::ShapeMismatch {
                name: "points",
                expected,
                actual: (points.nrows(), points.ncols()),
            });
        }

        let displacement = self.displacement();
        Ok(Mat::from_fn(expected.0, expected.1, |i, k| {
            points.read(i, k) + displacement.read(i, k)
        }))
    }

    /// Apply the fitted displacement field to a set of D-dimensional points.
    ///
    /// See [`DeformableTransform::transform_points`].
    pub fn transform_points_array<const D: usize>(
        &self,
        points: &[[f64; D]],
    ) -> Result<Vec<[f64; D]>, CPDError> {
        let transformed = self.transform_points(points_to_mat(points).as_ref())?;
        mat_to_points(transformed.as_ref())
    }

    fn check_context(&self, ctx: &EMContext) -> Result<(), CPDError> {
        let expected = (self.w.nrows(), self.w.ncols());
        let actual = (ctx.num_source(), ctx.dim());
        if actual != expected {
            return Err(CPDError::ShapeMismatch {
                name: "source",
                expected,
                actual,
            });
        }
        Ok(())
    }
}

impl EMTransform for DeformableTransform {
    /// Solve `(diag(P1) G + alpha sigma2 I) W = P X - diag(P1) Y` for the displacement weights.
    ///
    /// The previous weights are kept if the system is singular.
    fn update_transform(&mut self, ctx: &EMContext) -> Result<(), CPDError> {
        self.check_context(ctx)?;

        let (num_source, dim) = (ctx.num_source(), ctx.dim());
        let p1 = ctx.p1();
        let source = ctx.source();
        let reg = self.params.alpha * ctx.sigma2();

        let mat_a = Mat::from_fn(num_source, num_source, |i, j| {
            let value = p1[i] * self.g.read(i, j);
            if i == j {
                value + reg
            } else {
                value
            }
        });

        let px = ctx.p() * ctx.target();
        let mat_b = Mat::from_fn(num_source, dim, |i, k| {
            px.read(i, k) - p1[i] * source.read(i, k)
        });

        self.w = ops::solve_lu(mat_a.as_ref(), mat_b.as_ref())?;

        Ok(())
    }

    /// Update the transformed source points as `TY = Y + G W`.
    fn transform_point_cloud(&mut self, ctx: &EMContext) -> Result<(), CPDError> {
        self.check_context(ctx)?;
        self.ty = self.transform_points(ctx.source())?;
        Ok(())
    }

    /// Estimate the variance from the weighted residuals between the target points and the
    /// transformed source points.
    ///
    /// A non-positive estimate is replaced by a tenth of the convergence tolerance.
    fn update_variance(&self, ctx: &mut EMContext) -> Result<(), CPDError> {
        self.check_context(ctx)?;

        let target = ctx.target();
        let ty = self.ty.as_ref();
        let px = ctx.p() * target;

        // trace(X^T diag(Pt1) X) - 2 trace((P X)^T TY) + trace(TY^T diag(P1) TY)
        let x_pt1_x = ops::weighted_inner(target, target, Some(ctx.pt1()));
        let px_ty = ops::weighted_inner(px.as_ref(), ty, None);
        let ty_p1_ty = ops::weighted_inner(ty, ty, Some(ctx.p1()));

        let mut sigma2 = (x_pt1_x - 2.0 * px_ty + ty_p1_ty) / (ctx.np() * ctx.dim() as f64);

        // NOTE: NaN appears when no point is matched (np == 0), inf when np underflows
        if !(sigma2 > 0.0 && sigma2.is_finite()) {
            log::debug!(
                "Non-positive variance estimate {}, clamping to {}",
                sigma2,
                ctx.tolerance() / 10.0
            );
            sigma2 = ctx.tolerance() / 10.0;
        }

        ctx.set_sigma2(sigma2)
    }

    fn transformed_points(&self) -> MatRef<'_, f64> {
        self.ty.as_ref()
    }
}

/// Result of the deformable registration.
#[derive(Debug, Clone)]
pub struct DeformableResult<const D: usize> {
    /// The source points deformed onto the target.
    pub transformed: Vec<[f64; D]>,
    /// The fitted transform, used to displace other points with the same field.
    pub transform: DeformableTransform,
    /// The total number of iterations performed.
    pub num_iterations: usize,
    /// The last computed variance.
    pub sigma2: f64,
    /// The last absolute change of the variance.
    pub err: f64,
    /// Whether the registration converged before the maximum number of iterations.
    pub converged: bool,
}

/// Deformable Coherent Point Drift registration.
///
/// # Arguments
///
/// * `target` - The fixed points.
/// * `source` - The moving points.
/// * `em_params` - Expectation-Maximization parameters.
/// * `params` - Parameters of the deformable transform.
///
/// # Returns
///
/// * `result` - The deformed source points and the fitted transform.
pub fn register_deformable<const D: usize>(
    target: &[[f64; D]],
    source: &[[f64; D]],
    em_params: &EMParams,
    params: &DeformableParams,
) -> Result<DeformableResult<D>, CPDError> {
    let mut ctx = EMContext::new(points_to_mat(target), points_to_mat(source), em_params)?;
    let mut transform = DeformableTransform::new(&ctx, params)?;

    let result = em::register(&mut ctx, &mut transform)?;

    Ok(DeformableResult {
        transformed: mat_to_points(transform.transformed_points())?,
        transform,
        num_iterations: result.num_iterations,
        sigma2: result.sigma2,
        err: result.err,
        converged: result.converged,
    })
}
