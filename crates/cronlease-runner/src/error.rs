//! Error types for leased execution.

use thiserror::Error;

use cronlease_lease::LeaseError;

/// Reasons an execution never got to run its command to an outcome.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Another holder has the lease; nothing was run.
    #[error("lease {0} is held elsewhere, not running")]
    LockBusy(String),

    /// The lease store could not be reached or answered with an error.
    #[error("lease store error: {0}")]
    Store(LeaseError),

    /// The command vector was empty.
    #[error("no command given")]
    EmptyCommand,

    /// The command could not be started.
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child process failed.
    #[error("failed to wait for command: {0}")]
    Wait(#[source] std::io::Error),
}

impl ExecutionError {
    /// Whether this is expected contention rather than a real failure.
    pub fn is_lock_busy(&self) -> bool {
        matches!(self, Self::LockBusy(_))
    }
}

impl From<LeaseError> for ExecutionError {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::Busy(name) => Self::LockBusy(name),
            other => Self::Store(other),
        }
    }
}
