//! Error types for zrescue
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in zrescue
#[derive(Debug, Error)]
pub enum RescueError {
    /// Not root, missing tool, missing key file, no pools visible
    #[error("Prerequisite failed: {0}")]
    Prerequisite(String),

    /// An external command could not be started
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A mandatory external command exited non-zero
    #[error("Command '{command}' failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Command output did not have the expected shape
    #[error("Malformed output from '{command}': {detail}")]
    MalformedOutput { command: String, detail: String },

    /// A pool, dataset or file the run depends on does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operator supplied an unusable answer
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The state machine was asked to skip or revisit a state
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Operator interrupt observed between steps
    #[error("Interrupted by signal")]
    Interrupted,

    /// Interactive prompt error
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RescueError {
    /// Returns true for errors raised before any resource is touched
    pub fn is_prerequisite(&self) -> bool {
        matches!(self, RescueError::Prerequisite(_))
    }
}

impl From<dialoguer::Error> for RescueError {
    fn from(err: dialoguer::Error) -> Self {
        RescueError::Prompt(err.to_string())
    }
}

/// Result type alias for zrescue operations
pub type Result<T> = std::result::Result<T, RescueError>;
