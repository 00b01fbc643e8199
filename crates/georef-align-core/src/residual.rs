//! Residual blocks fed to the least-squares solver.

use crate::manifold::{AngleManifold, EuclideanManifold, Manifold};
use crate::types::{CorrespondencePoint, TransformEstimate};
use nalgebra::{Matrix2x3, Point2, Vector2};

/// Number of free parameters in the tangent space: `[δtx, δty, δθ]`.
pub const TANGENT_DIM: usize = 3;

/// Jacobian of a 2D residual w.r.t. the tangent space.
pub type TangentJacobian = Matrix2x3<f64>;

/// Capability interface: given parameters, produce a residual and its Jacobian.
pub trait ResidualBlock {
    fn residual(&self, params: &TransformEstimate) -> Vector2<f64>;

    /// Jacobian w.r.t. `[δtx, δty, δθ]`, i.e. already chained through the
    /// parameter manifolds.
    fn jacobian(&self, params: &TransformEstimate) -> TangentJacobian;

    /// Residual and Jacobian in one call. Override when the two share work.
    fn evaluate(&self, params: &TransformEstimate) -> (Vector2<f64>, TangentJacobian) {
        (self.residual(params), self.jacobian(params))
    }
}

/// `r = R(θ)·w + t − g` for one correspondence. Unweighted, no robust loss.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlignmentResidual {
    world: Point2<f64>,
    georef: Point2<f64>,
}

impl AlignmentResidual {
    pub fn new(world: Point2<f64>, georef: Point2<f64>) -> Self {
        Self { world, georef }
    }
}

impl From<CorrespondencePoint> for AlignmentResidual {
    fn from(c: CorrespondencePoint) -> Self {
        Self::new(c.world, c.georef)
    }
}

impl From<&CorrespondencePoint> for AlignmentResidual {
    fn from(c: &CorrespondencePoint) -> Self {
        Self::new(c.world, c.georef)
    }
}

impl ResidualBlock for AlignmentResidual {
    #[inline]
    fn residual(&self, params: &TransformEstimate) -> Vector2<f64> {
        params.apply(self.world) - self.georef
    }

    #[inline]
    fn jacobian(&self, params: &TransformEstimate) -> TangentJacobian {
        self.evaluate(params).1
    }

    fn evaluate(&self, params: &TransformEstimate) -> (Vector2<f64>, TangentJacobian) {
        let (s, c) = params.rotation.sin_cos();
        let (wx, wy) = (self.world.x, self.world.y);

        let rx = c * wx - s * wy + params.translation.x - self.georef.x;
        let ry = s * wx + c * wy + params.translation.y - self.georef.y;

        // dR(θ)/dθ · w
        let d_theta = Vector2::new(-s * wx - c * wy, c * wx - s * wy);
        let tx = EuclideanManifold.plus_jacobian(params.translation.x);
        let ty = EuclideanManifold.plus_jacobian(params.translation.y);
        let th = AngleManifold.plus_jacobian(params.rotation);

        #[rustfmt::skip]
        let jac = Matrix2x3::new(
            tx,  0.0, d_theta.x * th,
            0.0, ty,  d_theta.y * th,
        );
        (Vector2::new(rx, ry), jac)
    }
}
