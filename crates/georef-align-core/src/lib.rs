//! Core types and numerics for aligning a local world frame to a georeferenced frame.
//!
//! This crate is intentionally small and purely numerical. It does *not*
//! know about message transports, frame lookups or threads; the
//! `georef-align` crate wires it into a running estimator.
//!
//! ## Quickstart
//!
//! ```
//! use georef_align_core::{
//!     solve_alignment, AlignmentResidual, CorrespondencePoint, SolverOptions, TransformEstimate,
//! };
//! use nalgebra::Point2;
//!
//! let truth = TransformEstimate::new([3.0, -1.0], 0.4);
//! let blocks: Vec<AlignmentResidual> = (0..6)
//!     .map(|i| {
//!         let w = Point2::new(i as f64, (i * i) as f64 * 0.5);
//!         AlignmentResidual::from(CorrespondencePoint::new(w, truth.apply(w)))
//!     })
//!     .collect();
//!
//! let (estimate, summary) =
//!     solve_alignment(&blocks, TransformEstimate::identity(), &SolverOptions::default())
//!         .expect("non-empty problem");
//! assert!(summary.is_converged());
//! assert!((estimate.rotation - 0.4).abs() < 1e-6);
//! ```
//!
//! Model: `georef ≈ R(θ) · world + t`, minimised in ordinary least squares
//! over every stored correspondence. The rotation lives on the circle and is
//! updated through [`AngleManifold`].

mod logger;
mod manifold;
mod residual;
mod solver;
mod store;
mod types;

#[cfg(feature = "tracing")]
pub use logger::{init_tracing, DEFAULT_TRACING_FILTER};
pub use logger::init_with_level;

pub use manifold::{normalize_angle, AngleManifold, EuclideanManifold, Manifold};
pub use residual::{AlignmentResidual, ResidualBlock, TangentJacobian, TANGENT_DIM};
pub use solver::{
    solve_alignment, IterationSummary, LevenbergMarquardt, SolverError, SolverOptions,
    SolverSummary, TerminationType,
};
pub use store::{CorrespondenceStore, StoreError, DEFAULT_BATCH_SIZE};
pub use types::{CorrespondencePoint, TransformEstimate};
