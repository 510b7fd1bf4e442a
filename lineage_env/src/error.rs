//! Error types for the Lineage environment abstraction.

use crate::observation::Timestep;
use crate::types::Roi;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by label volumes and feature providers.
///
/// Region reads propagate these unchanged to their callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    /// The upstream source cannot serve data right now
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The requested region is not inside the volume
    #[error("ROI {roi} exceeds volume shape {shape:?}")]
    RoiOutOfBounds { roi: Roi, shape: [usize; 5] },

    /// A requested timestep does not exist in the source
    #[error("Timestep {0} is not present in the source")]
    MissingTimestep(Timestep),

    /// Buffer length does not match the declared shape
    #[error("Shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Block or snapshot encoding/decoding failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A persisted snapshot belongs to a different committed state
    #[error("Snapshot of version {stored} does not match committed version {current}")]
    VersionMismatch { stored: u64, current: u64 },
}

impl EnvError {
    /// Creates an unavailable-source error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    /// Creates a serialization error from any displayable cause.
    pub fn serialization(cause: impl std::fmt::Display) -> Self {
        Self::SerializationError(cause.to_string())
    }
}

/// Failure kinds reported by the combinatorial solver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    /// No assignment satisfies the constraints
    #[error("Infeasible: {0}")]
    Infeasible(String),

    /// The solver ran past its time limit
    #[error("Solver exceeded its time limit of {0:?}")]
    Timeout(Duration),

    /// Any other internal solver fault
    #[error("Solver failure: {0}")]
    Internal(String),
}

impl SolverError {
    /// Creates an internal solver error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
