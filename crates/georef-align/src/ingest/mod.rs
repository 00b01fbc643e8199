//! Inbound adapter: georeferenced observations and run-optimization requests.
//!
//! Each observation carries a georeferenced position and a timestamp; the
//! matching world-frame position is resolved through a [`FrameLookup`] with a
//! bounded wait. Observations whose correlate cannot be resolved are dropped,
//! never queued or retried.

mod handler;
mod observation;
mod pose_buffer;

pub use handler::{HandlerParams, IngestError, IngestOutcome, ObservationHandler};
pub use observation::{GeorefObservation, InboundMessage, RunOptimizationRoute};
pub use pose_buffer::{FrameLookup, LookupError, PoseBuffer};
