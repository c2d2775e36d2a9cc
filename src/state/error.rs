use std::fmt;
use thiserror::Error;

use super::event::StateType;

/// Marker carried by cancellations the engine performs on purpose.
pub const EXPECTED_CANCELLATION_MESSAGE: &str = "Expected State Cancellation";

/// Why a feature scope was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The machine moved on to the next feature.
    Superseded,
    /// The run delivered its `Complete` item.
    Completed,
    /// Cancelled from outside the workflow (machine shutdown, dropped run).
    Shutdown,
}

impl CancelReason {
    /// Superseded and completed features are stopped by the engine itself and
    /// are never reported as faults.
    pub fn is_expected(&self) -> bool {
        matches!(self, CancelReason::Superseded | CancelReason::Completed)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Superseded => write!(f, "Superseded: {EXPECTED_CANCELLATION_MESSAGE}"),
            CancelReason::Completed => write!(f, "Completed: {EXPECTED_CANCELLATION_MESSAGE}"),
            CancelReason::Shutdown => write!(f, "Workflow shutdown"),
        }
    }
}

/// Configuration errors raised while starting or wiring a workflow.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Workflows must start with a registered feature. No registered feature of: {state}")]
    UnregisteredFeature { state: StateType },
    #[error("{state} expects input of type {expected}, got {actual}")]
    InputMismatch {
        state: StateType,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Faults raised inside a feature's scope.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("feature task cancelled ({0})")]
    Cancelled(CancelReason),
    #[error("feature task panicked: {0}")]
    Panicked(String),
    #[error("input for {state} is not a {expected}")]
    InputMismatch {
        state: StateType,
        expected: &'static str,
    },
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl FeatureError {
    pub fn is_expected_cancellation(&self) -> bool {
        matches!(self, FeatureError::Cancelled(reason) if reason.is_expected())
    }
}
