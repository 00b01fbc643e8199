use super::{EstimatorError, EstimatorParams, SolveReport, SolveTrigger};
use crate::export::DiagnosticExporter;
use georef_align_core::{
    AlignmentResidual, CorrespondencePoint, CorrespondenceStore, LevenbergMarquardt,
    TerminationType, TransformEstimate,
};
use nalgebra::Point2;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Consistent view of the estimator taken under its lock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EstimatorSnapshot {
    pub estimate: TransformEstimate,
    pub generation: u64,
    pub correspondences: usize,
}

struct EstimatorState {
    store: CorrespondenceStore,
    estimate: TransformEstimate,
    generation: u64,
}

/// World-to-georef alignment estimator.
///
/// One mutex guards the correspondence history and the estimate together:
/// append + threshold check, the whole solve-and-update sequence, and every
/// read happen under it, so a reader never sees a translation and a rotation
/// from different solves. A solve triggered by [`Estimator::ingest`] runs
/// synchronously and blocks that call (and concurrent readers) until it
/// finishes.
///
/// Share it between adapters with `Arc<Estimator>`.
pub struct Estimator {
    params: EstimatorParams,
    solver: LevenbergMarquardt,
    exporter: Option<DiagnosticExporter>,
    state: Mutex<EstimatorState>,
}

impl Estimator {
    pub fn new(params: EstimatorParams) -> Result<Self, EstimatorError> {
        if !params.initial.is_finite() {
            return Err(EstimatorError::NonFiniteInitialEstimate);
        }
        let store = CorrespondenceStore::new(params.batch_size)?;
        let exporter = params.diagnostics_path.clone().map(DiagnosticExporter::new);

        log::info!(
            "initial transform: t: {} {} r: {}",
            params.initial.translation.x,
            params.initial.translation.y,
            params.initial.rotation
        );

        Ok(Self {
            solver: LevenbergMarquardt::new(params.solver.clone()),
            exporter,
            state: Mutex::new(EstimatorState {
                store,
                estimate: params.initial,
                generation: 0,
            }),
            params,
        })
    }

    #[inline]
    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }

    fn lock(&self) -> MutexGuard<'_, EstimatorState> {
        // Every write replaces the state as a whole, so a poisoned lock still
        // holds a consistent value.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store one correspondence; run a batch solve when the history size hits
    /// a multiple of the batch size.
    ///
    /// Returns the solve report when a solve ran.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn ingest(
        &self,
        world: Point2<f64>,
        georef: Point2<f64>,
    ) -> Result<Option<SolveReport>, EstimatorError> {
        let point = CorrespondencePoint::new(world, georef);
        if !point.is_finite() {
            return Err(EstimatorError::NonFiniteCorrespondence);
        }

        let mut state = self.lock();
        let n = state.store.append(point);
        log::debug!("stored correspondence #{n}");
        if !state.store.should_solve() {
            return Ok(None);
        }
        self.solve_locked(&mut state, SolveTrigger::Batch).map(Some)
    }

    /// Re-optimize over the full history now, independent of the batch counter.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn solve(&self) -> Result<SolveReport, EstimatorError> {
        let mut state = self.lock();
        self.solve_locked(&mut state, SolveTrigger::OnDemand)
    }

    fn solve_locked(
        &self,
        state: &mut EstimatorState,
        trigger: SolveTrigger,
    ) -> Result<SolveReport, EstimatorError> {
        if state.store.is_empty() {
            return Err(EstimatorError::NoCorrespondences);
        }

        let blocks: Vec<AlignmentResidual> =
            state.store.iter().map(AlignmentResidual::from).collect();
        let previous = state.estimate;
        let (estimate, summary) = self.solver.minimize(&blocks, previous)?;

        // Best effort: whatever the solver produced is published, converged or not.
        state.estimate = estimate;
        state.generation += 1;

        log::info!("translation {} {}", estimate.translation.x, estimate.translation.y);
        log::info!("rotation {}", estimate.rotation);
        if summary.is_converged() {
            log::debug!("{}", summary.brief_report());
        } else {
            log::warn!("{}", summary.full_report());
        }

        let diagnostics = match (&self.exporter, summary.termination) {
            (Some(_), TerminationType::Failure) => None,
            (Some(exporter), _) => match exporter.export(state.store.as_slice(), &estimate) {
                Ok(_) => Some(exporter.path().to_path_buf()),
                Err(err) => {
                    log::warn!(
                        "diagnostic export to {} failed: {err}",
                        exporter.path().display()
                    );
                    None
                }
            },
            (None, _) => None,
        };

        Ok(SolveReport {
            trigger,
            correspondences: blocks.len(),
            generation: state.generation,
            previous,
            estimate,
            summary,
            diagnostics,
        })
    }

    /// Snapshot of the current estimate.
    pub fn current_estimate(&self) -> TransformEstimate {
        self.lock().estimate
    }

    /// Estimate, solve generation and history size read together.
    pub fn snapshot(&self) -> EstimatorSnapshot {
        let state = self.lock();
        EstimatorSnapshot {
            estimate: state.estimate,
            generation: state.generation,
            correspondences: state.store.len(),
        }
    }

    pub fn correspondence_count(&self) -> usize {
        self.lock().store.len()
    }

    /// Copy of the full history in arrival order.
    pub fn correspondences(&self) -> Vec<CorrespondencePoint> {
        self.lock().store.as_slice().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use georef_align_core::SolverOptions;

    fn estimator(initial: TransformEstimate) -> Estimator {
        Estimator::new(EstimatorParams::with_initial(initial)).expect("estimator")
    }

    #[test]
    fn rejects_zero_batch_size() {
        let params = EstimatorParams {
            batch_size: 0,
            ..EstimatorParams::default()
        };
        assert!(matches!(
            Estimator::new(params),
            Err(EstimatorError::Store(_))
        ));
    }

    #[test]
    fn rejects_non_finite_initial_estimate() {
        let params = EstimatorParams::with_initial(TransformEstimate::new([0.0, f64::NAN], 0.0));
        assert!(matches!(
            Estimator::new(params),
            Err(EstimatorError::NonFiniteInitialEstimate)
        ));
    }

    #[test]
    fn solve_without_data_is_reported() {
        let est = estimator(TransformEstimate::identity());
        assert!(matches!(est.solve(), Err(EstimatorError::NoCorrespondences)));
        assert_eq!(est.snapshot().generation, 0);
    }

    #[test]
    fn non_finite_correspondence_is_not_stored() {
        let est = estimator(TransformEstimate::identity());
        let err = est
            .ingest(Point2::new(f64::INFINITY, 0.0), Point2::new(0.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, EstimatorError::NonFiniteCorrespondence));
        assert_eq!(est.correspondence_count(), 0);
    }

    #[test]
    fn initial_estimate_is_published_until_first_batch() {
        let initial = TransformEstimate::new([5.0, 6.0], 0.25);
        let est = estimator(initial);
        let truth = TransformEstimate::new([1.0, -1.0], 0.5);
        for i in 0..9 {
            let w = Point2::new(i as f64, (i % 3) as f64);
            assert!(est.ingest(w, truth.apply(w)).unwrap().is_none());
            assert_eq!(est.current_estimate(), initial);
        }
        let w = Point2::new(9.0, 4.0);
        let report = est.ingest(w, truth.apply(w)).unwrap().expect("10th triggers");
        assert_eq!(report.trigger, SolveTrigger::Batch);
        assert_eq!(report.correspondences, 10);
        assert_eq!(report.generation, 1);
        assert_eq!(report.previous, initial);
        assert_relative_eq!(report.estimate.rotation, 0.5, epsilon = 1e-6);
        assert_eq!(est.current_estimate(), report.estimate);
    }

    #[test]
    fn on_demand_solve_ignores_batch_counter() {
        let est = estimator(TransformEstimate::identity());
        let truth = TransformEstimate::new([0.0, 2.0], -0.3);
        for i in 0..3 {
            let w = Point2::new(i as f64, 1.0 - i as f64 * 0.5);
            est.ingest(w, truth.apply(w)).unwrap();
        }
        let report = est.solve().unwrap();
        assert_eq!(report.trigger, SolveTrigger::OnDemand);
        assert_eq!(report.correspondences, 3);
        assert_relative_eq!(report.estimate.translation.y, 2.0, epsilon = 1e-6);
        assert_eq!(est.correspondences().len(), 3);
    }

    #[test]
    fn non_converged_solve_is_still_published() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solution.csv");
        let initial = TransformEstimate::new([-50.0, 80.0], -2.0);
        let est = Estimator::new(EstimatorParams {
            initial,
            solver: SolverOptions {
                max_iterations: 1,
                ..SolverOptions::default()
            },
            diagnostics_path: Some(path.clone()),
            ..EstimatorParams::default()
        })
        .unwrap();

        let truth = TransformEstimate::new([3.0, -2.0], 0.4);
        let mut last = None;
        for i in 0..10 {
            let w = Point2::new(i as f64 * 2.0, (i % 4) as f64 - 1.5);
            last = est.ingest(w, truth.apply(w)).unwrap();
        }
        let report = last.expect("10th correspondence triggers a solve");

        assert_eq!(report.summary.termination, TerminationType::NoConvergence);
        assert!(!report.is_converged());
        assert_eq!(report.previous, initial);
        assert_ne!(report.estimate, report.previous);
        assert!(report.summary.final_cost < report.summary.initial_cost);
        assert_eq!(report.generation, 1);
        assert_eq!(est.current_estimate(), report.estimate);
        assert_eq!(est.snapshot().generation, 1);

        assert_eq!(report.diagnostics.as_deref(), Some(path.as_path()));
        let rows = crate::export::read_diagnostics(&path).unwrap();
        assert_eq!(rows.len(), 10);
        for (row, point) in rows.iter().zip(est.correspondences()) {
            let aligned = report.estimate.apply(point.world);
            assert_relative_eq!(row.world_x, aligned.x, epsilon = 1e-9);
            assert_relative_eq!(row.world_y, aligned.y, epsilon = 1e-9);
        }
    }
}
