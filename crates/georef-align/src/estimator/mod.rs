//! Online alignment estimator.
//!
//! This module owns the correspondence history and the current transform
//! estimate behind one lock, triggers a full-batch re-optimization every
//! `batch_size` correspondences, and optionally exports fit diagnostics.

mod error;
mod params;
mod pipeline;
mod result;

pub use error::EstimatorError;
pub use params::EstimatorParams;
pub use pipeline::{Estimator, EstimatorSnapshot};
pub use result::{SolveReport, SolveTrigger};
