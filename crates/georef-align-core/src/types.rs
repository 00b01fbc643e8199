use crate::manifold::normalize_angle;
use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

/// One paired observation: the same physical location seen in the local
/// world frame and in the georeferenced frame.
///
/// Correspondences are immutable once created.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrespondencePoint {
    pub world: Point2<f64>,
    pub georef: Point2<f64>,
}

impl CorrespondencePoint {
    pub fn new(world: Point2<f64>, georef: Point2<f64>) -> Self {
        Self { world, georef }
    }

    pub fn from_arrays(world: [f64; 2], georef: [f64; 2]) -> Self {
        Self::new(
            Point2::new(world[0], world[1]),
            Point2::new(georef[0], georef[1]),
        )
    }

    /// True when both points have finite coordinates.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.world.iter().chain(self.georef.iter()).all(|v| v.is_finite())
    }
}

/// Rigid 2D transform `georef = R(rotation) * world + translation`.
///
/// `rotation` is in radians and is not required to be wrapped; consumers
/// must only use it through `cos`/`sin`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformEstimate {
    pub translation: Vector2<f64>,
    pub rotation: f64,
}

impl Default for TransformEstimate {
    fn default() -> Self {
        Self::identity()
    }
}

impl TransformEstimate {
    pub fn new(translation: [f64; 2], rotation: f64) -> Self {
        Self {
            translation: Vector2::new(translation[0], translation[1]),
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new([0.0, 0.0], 0.0)
    }

    /// `[tx, ty, theta]`, the layout used by the solver.
    pub fn to_array(&self) -> [f64; 3] {
        [self.translation.x, self.translation.y, self.rotation]
    }

    pub fn from_array(v: [f64; 3]) -> Self {
        Self::new([v[0], v[1]], v[2])
    }

    #[inline]
    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        let (s, c) = self.rotation.sin_cos();
        Matrix2::new(c, -s, s, c)
    }

    /// Map a world-frame point into the georeferenced frame.
    #[inline]
    pub fn apply(&self, world: Point2<f64>) -> Point2<f64> {
        Point2::from(self.rotation_matrix() * world.coords + self.translation)
    }

    /// Transform mapping georeferenced points back into the world frame.
    pub fn inverse(&self) -> Self {
        let r_t = self.rotation_matrix().transpose();
        let t = -(r_t * self.translation);
        Self {
            translation: t,
            rotation: -self.rotation,
        }
    }

    /// Same transform with the rotation wrapped into `(-pi, pi]`.
    pub fn normalized(&self) -> Self {
        Self {
            translation: self.translation,
            rotation: normalize_angle(self.rotation),
        }
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.translation.x.is_finite() && self.translation.y.is_finite() && self.rotation.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn assert_close(a: Point2<f64>, b: Point2<f64>, tol: f64) {
        assert!(
            (a - b).norm() < tol,
            "expected ({:.9},{:.9}) ~ ({:.9},{:.9}) within {}",
            a.x,
            a.y,
            b.x,
            b.y,
            tol
        );
    }

    #[test]
    fn apply_rotates_then_translates() {
        let t = TransformEstimate::new([1.0, 2.0], PI / 2.0);
        assert_close(t.apply(Point2::new(1.0, 0.0)), Point2::new(1.0, 3.0), 1e-12);
        assert_close(t.apply(Point2::new(0.0, 0.0)), Point2::new(1.0, 2.0), 1e-12);
    }

    #[test]
    fn inverse_round_trips_points() {
        let t = TransformEstimate::new([-250.0, 13.5], 2.7);
        let inv = t.inverse();
        for p in [
            Point2::new(0.0, 0.0),
            Point2::new(50.0, -20.0),
            Point2::new(320.0, 200.0),
        ] {
            assert_close(inv.apply(t.apply(p)), p, 1e-9);
        }
    }

    #[test]
    fn normalized_keeps_geometry() {
        let t = TransformEstimate::new([0.5, 0.5], 3.0 + 2.0 * PI);
        let n = t.normalized();
        assert_relative_eq!(n.rotation, 3.0, epsilon = 1e-12);
        let p = Point2::new(4.0, -7.0);
        assert_close(t.apply(p), n.apply(p), 1e-9);
    }

    #[test]
    fn non_finite_correspondence_is_flagged() {
        let c = CorrespondencePoint::from_arrays([f64::NAN, 0.0], [1.0, 1.0]);
        assert!(!c.is_finite());
        assert!(CorrespondencePoint::from_arrays([0.0, 0.0], [1.0, 1.0]).is_finite());
    }
}
