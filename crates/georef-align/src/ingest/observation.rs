use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Position reported in the georeferenced frame (e.g. UTM easting/northing).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeorefObservation {
    /// Frame the receiver reports for itself, e.g. `navsat_link`.
    pub frame_id: String,
    /// Acquisition time in seconds.
    pub stamp: f64,
    pub position: Point2<f64>,
}

impl GeorefObservation {
    pub fn new(frame_id: impl Into<String>, stamp: f64, position: Point2<f64>) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp,
            position,
        }
    }
}

/// Everything the inbound adapter can receive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundMessage {
    Observation(GeorefObservation),
    /// Request to re-optimize now. The payload only matters under
    /// [`RunOptimizationRoute::ObservationHandler`].
    RunOptimization(Option<GeorefObservation>),
}

/// Where run-optimization requests are dispatched.
///
/// Deployed systems have been seen wiring the request channel into the
/// observation handler, so a request never solves by itself; whether that
/// was intended is unknown, so both behaviours are selectable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOptimizationRoute {
    /// Dedicated handler: solve over the full history immediately.
    #[default]
    ImmediateSolve,
    /// Shared with observations: the request is ingested like an
    /// observation and only the batch counter can trigger a solve.
    ObservationHandler,
}
