use super::{FrameLookup, GeorefObservation, InboundMessage, LookupError, RunOptimizationRoute};
use crate::estimator::{Estimator, EstimatorError, SolveReport};
use std::sync::Arc;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// The world-frame position could not be resolved; the observation is gone.
    #[error("no world-frame correlate for observation at t={stamp:.3}: {source}")]
    MissingCorrelate { stamp: f64, source: LookupError },
    /// A run-optimization request without payload reached the observation path.
    #[error("run-optimization request carries no observation")]
    MissingPayload,
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
}

/// Frames and routing used by [`ObservationHandler`].
#[derive(Clone, Debug, PartialEq)]
pub struct HandlerParams {
    /// Frame the correlate is expressed in.
    pub world_frame: String,
    /// Frame observations are expected to be reported for.
    pub source_frame: String,
    /// Bounded wait for the world-frame correlate.
    pub lookup_timeout: Duration,
    pub route: RunOptimizationRoute,
}

impl Default for HandlerParams {
    fn default() -> Self {
        Self {
            world_frame: "world".to_string(),
            source_frame: "navsat_link".to_string(),
            lookup_timeout: Duration::from_secs(3),
            route: RunOptimizationRoute::default(),
        }
    }
}

/// What happened to one inbound message.
#[derive(Debug)]
pub enum IngestOutcome {
    /// The observation was paired and stored.
    Ingested {
        /// History size after the append.
        correspondences: usize,
        /// The observation declared another frame than expected.
        frame_mismatch: bool,
        /// Present when the append crossed a batch boundary.
        solve: Option<SolveReport>,
    },
    /// An explicit re-optimization ran.
    Solved(SolveReport),
}

impl IngestOutcome {
    /// The solve this message caused, if any.
    pub fn solve_report(&self) -> Option<&SolveReport> {
        match self {
            IngestOutcome::Ingested { solve, .. } => solve.as_ref(),
            IngestOutcome::Solved(report) => Some(report),
        }
    }
}

/// Pairs georeferenced observations with world-frame positions and feeds
/// them to the estimator.
///
/// Every failure is logged once here at warn level before it is returned, so
/// callers driving a message loop can simply move on to the next message.
pub struct ObservationHandler<L: FrameLookup> {
    estimator: Arc<Estimator>,
    lookup: L,
    params: HandlerParams,
}

impl<L: FrameLookup> ObservationHandler<L> {
    pub fn new(estimator: Arc<Estimator>, lookup: L, params: HandlerParams) -> Self {
        Self {
            estimator,
            lookup,
            params,
        }
    }

    pub fn estimator(&self) -> &Arc<Estimator> {
        &self.estimator
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    pub fn params(&self) -> &HandlerParams {
        &self.params
    }

    /// Dispatch one inbound message according to the configured route.
    pub fn handle(&self, message: InboundMessage) -> Result<IngestOutcome, IngestError> {
        match message {
            InboundMessage::Observation(obs) => self.handle_observation(&obs),
            InboundMessage::RunOptimization(payload) => self.handle_run_optimization(payload),
        }
    }

    pub fn handle_observation(
        &self,
        obs: &GeorefObservation,
    ) -> Result<IngestOutcome, IngestError> {
        let frame_mismatch = obs.frame_id != self.params.source_frame;
        if frame_mismatch {
            log::warn!(
                "expecting observations for {}, received: {}",
                self.params.source_frame,
                obs.frame_id
            );
        }

        // Resolved before touching the estimator so a slow lookup never
        // holds its lock.
        let world = self
            .lookup
            .lookup_position(
                &self.params.world_frame,
                &self.params.source_frame,
                obs.stamp,
                self.params.lookup_timeout,
            )
            .map_err(|source| {
                log::warn!("dropping observation at t={:.3}: {source}", obs.stamp);
                IngestError::MissingCorrelate {
                    stamp: obs.stamp,
                    source,
                }
            })?;

        let solve = self.estimator.ingest(world, obs.position).map_err(|err| {
            log::warn!("observation at t={:.3} rejected: {err}", obs.stamp);
            IngestError::from(err)
        })?;

        Ok(IngestOutcome::Ingested {
            correspondences: solve
                .as_ref()
                .map_or_else(|| self.estimator.correspondence_count(), |r| r.correspondences),
            frame_mismatch,
            solve,
        })
    }

    pub fn handle_run_optimization(
        &self,
        payload: Option<GeorefObservation>,
    ) -> Result<IngestOutcome, IngestError> {
        match self.params.route {
            RunOptimizationRoute::ImmediateSolve => {
                log::info!("run-optimization requested");
                self.estimator.solve().map(IngestOutcome::Solved).map_err(|err| {
                    log::warn!("run-optimization failed: {err}");
                    IngestError::from(err)
                })
            }
            RunOptimizationRoute::ObservationHandler => match payload {
                Some(obs) => self.handle_observation(&obs),
                None => {
                    log::warn!("run-optimization request without observation dropped");
                    Err(IngestError::MissingPayload)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::{EstimatorParams, SolveTrigger};
    use crate::ingest::PoseBuffer;
    use georef_align_core::TransformEstimate;
    use nalgebra::Point2;

    fn handler(route: RunOptimizationRoute) -> ObservationHandler<PoseBuffer> {
        let params = EstimatorParams {
            batch_size: 3,
            ..EstimatorParams::default()
        };
        let estimator = Arc::new(Estimator::new(params).unwrap());
        let buffer = PoseBuffer::new("world", "navsat_link");
        for i in 0..10 {
            buffer.insert(i as f64, Point2::new(i as f64, (i * i) as f64 * 0.1));
        }
        ObservationHandler::new(
            estimator,
            buffer,
            HandlerParams {
                lookup_timeout: Duration::ZERO,
                route,
                ..HandlerParams::default()
            },
        )
    }

    fn observation(h: &ObservationHandler<PoseBuffer>, stamp: f64) -> GeorefObservation {
        let truth = TransformEstimate::new([100.0, 200.0], 0.2);
        let world = h
            .lookup()
            .lookup_position("world", "navsat_link", stamp, Duration::ZERO)
            .unwrap();
        GeorefObservation::new("navsat_link", stamp, truth.apply(world))
    }

    #[test]
    fn missing_correlate_drops_observation() {
        let h = handler(RunOptimizationRoute::ImmediateSolve);
        let obs = GeorefObservation::new("navsat_link", 42.0, Point2::new(1.0, 1.0));
        let err = h.handle_observation(&obs).unwrap_err();
        assert!(matches!(
            err,
            IngestError::MissingCorrelate {
                source: LookupError::Timeout { .. },
                ..
            }
        ));
        assert_eq!(h.estimator().correspondence_count(), 0);
    }

    #[test]
    fn frame_mismatch_is_tolerated() {
        let h = handler(RunOptimizationRoute::ImmediateSolve);
        let mut obs = observation(&h, 1.0);
        obs.frame_id = "gps".to_string();
        match h.handle_observation(&obs).unwrap() {
            IngestOutcome::Ingested {
                correspondences,
                frame_mismatch,
                solve,
            } => {
                assert_eq!(correspondences, 1);
                assert!(frame_mismatch);
                assert!(solve.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn immediate_route_solves_without_batch_boundary() {
        let h = handler(RunOptimizationRoute::ImmediateSolve);
        h.handle(InboundMessage::Observation(observation(&h, 1.0))).unwrap();
        h.handle(InboundMessage::Observation(observation(&h, 2.5))).unwrap();
        let outcome = h.handle(InboundMessage::RunOptimization(None)).unwrap();
        let report = outcome.solve_report().expect("solve ran");
        assert_eq!(report.trigger, SolveTrigger::OnDemand);
        assert_eq!(report.correspondences, 2);
    }

    #[test]
    fn shared_route_ingests_payload_and_drops_empty_requests() {
        let h = handler(RunOptimizationRoute::ObservationHandler);
        assert!(matches!(
            h.handle(InboundMessage::RunOptimization(None)),
            Err(IngestError::MissingPayload)
        ));
        let obs = observation(&h, 4.0);
        let outcome = h.handle(InboundMessage::RunOptimization(Some(obs))).unwrap();
        assert!(outcome.solve_report().is_none());
        assert_eq!(h.estimator().correspondence_count(), 1);
        assert_eq!(h.estimator().snapshot().generation, 0);
    }

    #[test]
    fn third_observation_triggers_batch() {
        let h = handler(RunOptimizationRoute::ImmediateSolve);
        let mut last = None;
        for stamp in [1.0, 3.0, 6.0] {
            last = Some(h.handle_observation(&observation(&h, stamp)).unwrap());
        }
        let report = last.unwrap().solve_report().cloned().expect("batch solve");
        assert_eq!(report.trigger, SolveTrigger::Batch);
        assert_eq!(report.correspondences, 3);
    }
}
