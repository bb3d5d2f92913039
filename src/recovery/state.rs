//! Recovery states and the strictly sequential transition table.

use crate::error::{RescueError, Result};
use serde::Serialize;
use std::fmt;

/// Where a recovery run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    Init,
    PoolsSelected,
    PoolsImported,
    Unlocked,
    DatasetsIdentified,
    Mounted,
    Repaired,
    CleanedUp,
    /// A step failed; resources were rolled back
    Failed,
}

impl RecoveryState {
    /// The only state reachable on success, if any
    pub fn next(&self) -> Option<RecoveryState> {
        use RecoveryState::*;
        match self {
            Init => Some(PoolsSelected),
            PoolsSelected => Some(PoolsImported),
            PoolsImported => Some(Unlocked),
            Unlocked => Some(DatasetsIdentified),
            DatasetsIdentified => Some(Mounted),
            Mounted => Some(Repaired),
            Repaired => Some(CleanedUp),
            CleanedUp | Failed => None,
        }
    }

    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryState::CleanedUp | RecoveryState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryState::Init => "init",
            RecoveryState::PoolsSelected => "pools_selected",
            RecoveryState::PoolsImported => "pools_imported",
            RecoveryState::Unlocked => "unlocked",
            RecoveryState::DatasetsIdentified => "datasets_identified",
            RecoveryState::Mounted => "mounted",
            RecoveryState::Repaired => "repaired",
            RecoveryState::CleanedUp => "cleaned_up",
            RecoveryState::Failed => "failed",
        }
    }
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus every state visited, in order
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: RecoveryState,
    history: Vec<RecoveryState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: RecoveryState::Init,
            history: vec![RecoveryState::Init],
        }
    }

    pub fn current(&self) -> RecoveryState {
        self.current
    }

    pub fn history(&self) -> &[RecoveryState] {
        &self.history
    }

    /// Move forward to `to`, which must be the successor of the current state
    pub fn advance(&mut self, to: RecoveryState) -> Result<()> {
        if self.current.next() != Some(to) {
            return Err(RescueError::InvalidTransition {
                from: self.current.to_string(),
                to: to.to_string(),
            });
        }
        self.enter(to);
        Ok(())
    }

    /// Enter `Failed` from any non-terminal state
    pub fn fail(&mut self) -> Result<()> {
        if self.current.is_terminal() {
            return Err(RescueError::InvalidTransition {
                from: self.current.to_string(),
                to: RecoveryState::Failed.to_string(),
            });
        }
        self.enter(RecoveryState::Failed);
        Ok(())
    }

    fn enter(&mut self, state: RecoveryState) {
        log::info!("state: {} -> {}", self.current, state);
        self.current = state;
        self.history.push(state);
    }
}
