use georef_align_core::{SolverSummary, TransformEstimate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What started a solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveTrigger {
    /// The history size crossed a multiple of the batch size.
    Batch,
    /// An explicit run-optimization request.
    OnDemand,
}

/// Outcome of one full-batch solve.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolveReport {
    pub trigger: SolveTrigger,
    /// Number of correspondences the solve used.
    pub correspondences: usize,
    /// Incremented by every solve; `0` is the configured initial estimate.
    pub generation: u64,
    pub previous: TransformEstimate,
    /// Estimate now being published, kept even when the solve did not converge.
    pub estimate: TransformEstimate,
    pub summary: SolverSummary,
    /// Where the diagnostic table was written, if export is enabled and succeeded.
    #[serde(default)]
    pub diagnostics: Option<PathBuf>,
}

impl SolveReport {
    #[inline]
    pub fn is_converged(&self) -> bool {
        self.summary.is_converged()
    }
}
