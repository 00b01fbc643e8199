use georef_align_core::{SolverOptions, TransformEstimate, DEFAULT_BATCH_SIZE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the estimator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimatorParams {
    /// Estimate published before the first solve and used as its starting point.
    pub initial: TransformEstimate,
    /// A batch solve runs every time the history size reaches a multiple of this.
    pub batch_size: usize,
    /// Levenberg-Marquardt tolerances.
    pub solver: SolverOptions,
    /// Destination of the diagnostic table; `None` disables the export.
    ///
    /// The file is rewritten from scratch after every solve.
    pub diagnostics_path: Option<PathBuf>,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            initial: TransformEstimate::identity(),
            batch_size: DEFAULT_BATCH_SIZE,
            solver: SolverOptions::default(),
            diagnostics_path: None,
        }
    }
}

impl EstimatorParams {
    pub fn with_initial(initial: TransformEstimate) -> Self {
        Self {
            initial,
            ..Self::default()
        }
    }
}
