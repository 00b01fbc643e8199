use georef_align_core::{SolverError, StoreError};

/// Errors returned by the estimator.
#[derive(thiserror::Error, Debug)]
pub enum EstimatorError {
    #[error("no correspondences stored yet")]
    NoCorrespondences,
    #[error("correspondence has non-finite coordinates")]
    NonFiniteCorrespondence,
    #[error("initial estimate has non-finite parameters")]
    NonFiniteInitialEstimate,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Solver(#[from] SolverError),
}
