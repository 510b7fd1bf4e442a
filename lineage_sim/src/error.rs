//! Errors raised while running a scenario.

use lineage_core::TrackingError;
use lineage_env::EnvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The engine rejected a call the scenario expected to succeed
    #[error("tracking failed: {0}")]
    Tracking(#[from] TrackingError),

    /// A region read failed
    #[error("region read failed: {0}")]
    Read(#[from] EnvError),

    /// The engine's result contradicts the ground truth
    #[error("{0}")]
    Assertion(String),

    /// The world configuration cannot be rendered
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file access failed: {0}")]
    Io(#[from] std::io::Error),

    /// Parameter or export JSON could not be (de)serialized
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScenarioError {
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Fails the scenario with `msg` unless `condition` holds.
pub(crate) fn ensure(condition: bool, msg: impl FnOnce() -> String) -> Result<(), ScenarioError> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::Assertion(msg()))
    }
}
