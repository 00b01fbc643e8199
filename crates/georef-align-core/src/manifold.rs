//! Local parameterizations for the solver's parameters.
//!
//! The solver works on a 3-dof tangent space `[δtx, δty, δθ]`. Translation
//! components live on the real line; the rotation lives on the circle and
//! must be updated with angle addition so that steps across `±π` stay
//! continuous.

use std::f64::consts::PI;

/// Update rule `x ⊕ δ` for a single scalar parameter.
pub trait Manifold {
    /// Apply a tangent-space increment.
    fn plus(&self, x: f64, delta: f64) -> f64;

    /// `d(x ⊕ δ)/dδ` at `δ = 0`.
    fn plus_jacobian(&self, x: f64) -> f64;
}

/// Plain real-line parameter.
#[derive(Clone, Copy, Debug, Default)]
pub struct EuclideanManifold;

impl Manifold for EuclideanManifold {
    #[inline]
    fn plus(&self, x: f64, delta: f64) -> f64 {
        x + delta
    }

    #[inline]
    fn plus_jacobian(&self, _x: f64) -> f64 {
        1.0
    }
}

/// Angle on the circle; `θ ⊕ δ = θ + δ`, reported wrapped into `(-π, π]`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AngleManifold;

impl Manifold for AngleManifold {
    #[inline]
    fn plus(&self, x: f64, delta: f64) -> f64 {
        normalize_angle(x + delta)
    }

    #[inline]
    fn plus_jacobian(&self, _x: f64) -> f64 {
        1.0
    }
}

/// Wrap an angle into `(-π, π]`. Non-finite input is returned unchanged.
pub fn normalize_angle(theta: f64) -> f64 {
    if !theta.is_finite() {
        return theta;
    }
    let two_pi = 2.0 * PI;
    let wrapped = theta - two_pi * ((theta + PI) / two_pi).floor();
    // floor() maps +π to -π; keep the closed end at +π.
    if wrapped <= -PI {
        wrapped + two_pi
    } else {
        wrapped
    }
}
