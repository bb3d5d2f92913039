use super::context::{Journal, RecoveryContext};
use super::state::RecoveryState;
use crate::error::RescueError;
use crate::registry::{Resource, RollbackReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Outcome of a run that did not fail
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `CleanedUp`, or `Mounted` for a mount-only run
    pub final_state: RecoveryState,
    pub history: Vec<RecoveryState>,
    pub context: Option<RecoveryContext>,
    pub journal: Journal,
    /// Resources deliberately left in place for the operator
    pub held: Vec<Resource>,
}

impl RecoveryReport {
    pub fn is_complete(&self) -> bool {
        self.final_state == RecoveryState::CleanedUp
    }
}

/// A run that failed, after rollback
#[derive(Debug, Error, Serialize)]
#[error("recovery failed during {step}: {error}")]
pub struct RecoveryFailure {
    /// Name of the failing step
    pub step: String,
    #[source]
    #[serde(skip)]
    pub error: RescueError,
    /// Rendered `error`, for the JSON report
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub history: Vec<RecoveryState>,
    pub rollback: RollbackReport,
    pub journal: Journal,
}

impl RecoveryFailure {
    pub fn is_interrupted(&self) -> bool {
        matches!(self.error, RescueError::Interrupted)
    }
}
