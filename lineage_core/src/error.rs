//! Errors raised by the tracking engine.

use lineage_env::{EnvError, SolverError, Timestep};
use std::time::Duration;

/// Everything `track()` can fail with.
///
/// Every variant leaves the previously committed state untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackingError {
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Cannot track frames with 0 objects (timestep {timestep})")]
    EmptyFrame { timestep: Timestep },

    #[error(
        "The max. number of objects must be consistent with the number of labels given in \
         object count classification: expected {expected} labels, found {found}"
    )]
    LabelCountMismatch { expected: usize, found: usize },

    #[error("Tracking terminated unsuccessfully: infeasible ({0})")]
    Infeasible(String),

    #[error("Tracking terminated unsuccessfully: solver timed out after {0:?}")]
    Timeout(Duration),

    #[error("Tracking terminated unsuccessfully: {0}")]
    Solver(String),

    #[error("Tracking terminated unsuccessfully: events vector has zero length")]
    EmptyResult,

    #[error("Dimensionality error: {0}")]
    Dimensionality(String),

    #[error("Invalid tracking request: {0}")]
    InvalidRequest(String),

    #[error("Upstream source failed: {0}")]
    Source(#[from] EnvError),
}

impl From<SolverError> for TrackingError {
    fn from(err: SolverError) -> Self {
        match err {
            SolverError::Infeasible(msg) => Self::Infeasible(msg),
            SolverError::Timeout(limit) => Self::Timeout(limit),
            SolverError::Internal(msg) => Self::Solver(msg),
        }
    }
}

impl TrackingError {
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
