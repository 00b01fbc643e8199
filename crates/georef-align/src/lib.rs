//! Online world-to-georef alignment.
//!
//! This crate provides:
//! - an [`Estimator`] that accumulates (world, georef) correspondences and
//!   re-optimizes the 2D rigid transform every `batch_size` of them
//! - adapters around it: an inbound [`ObservationHandler`] that pairs
//!   georeferenced fixes with world-frame positions, an outbound
//!   [`TransformBroadcaster`], and the CSV [`DiagnosticExporter`]
//! - JSON configuration ([`AlignmentConfig`]) and a `replay` CLI (feature `cli`)
//!
//! ## Quickstart
//!
//! ```
//! use georef_align::{Estimator, EstimatorParams};
//! use georef_align::core::TransformEstimate;
//! use nalgebra::Point2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let truth = TransformEstimate::new([448_000.0, 5_411_000.0], 0.4);
//! let estimator = Estimator::new(EstimatorParams::default())?;
//! for i in 0..10 {
//!     let world = Point2::new(i as f64 * 3.0, (i % 4) as f64);
//!     if let Some(report) = estimator.ingest(world, truth.apply(world))? {
//!         println!("{}", report.summary.brief_report());
//!     }
//! }
//! assert!((estimator.current_estimate().rotation - 0.4).abs() < 1e-6);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `georef_align::core`: numerical core (manifold, residual, LM solver, store).
//! - [`estimator`]: the shared estimator and its solve reports.
//! - [`ingest`]: inbound messages, frame lookup and the pose buffer.
//! - [`publish`]: 3D embedding of the estimate and the periodic broadcaster.
//! - [`export`]: diagnostic CSV.
//! - [`io`]: JSON config/report and CSV replay inputs.

pub use georef_align_core as core;

pub mod estimator;
pub mod export;
pub mod ingest;
pub mod io;
pub mod publish;

pub use estimator::{
    Estimator, EstimatorError, EstimatorParams, EstimatorSnapshot, SolveReport, SolveTrigger,
};
pub use export::{read_diagnostics, DiagnosticExporter, DiagnosticRow, ExportError};
pub use ingest::{
    FrameLookup, GeorefObservation, HandlerParams, InboundMessage, IngestError, IngestOutcome,
    LookupError, ObservationHandler, PoseBuffer, RunOptimizationRoute,
};
pub use io::{
    read_observations_csv, read_trajectory_csv, AlignmentConfig, AlignmentReport,
    ConfigIoError, FrameConfig,
};
pub use publish::{
    stamped_transform, BroadcastParams, StampedTransform, TransformBroadcaster, TransformSink,
};

pub use georef_align_core::{
    CorrespondencePoint, SolverOptions, SolverSummary, TerminationType, TransformEstimate,
};
