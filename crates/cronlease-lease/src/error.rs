//! Error types for lease operations.

use thiserror::Error;

/// Errors that can occur in lease operations.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The lease is currently held by somebody else.
    #[error("lease {0} is already held")]
    Busy(String),

    /// The stored token no longer matches ours (expired and re-acquired, or released).
    #[error("lease {0} is not owned by this holder")]
    NotOwner(String),

    /// Store communication error.
    #[error("lease store error: {0}")]
    Store(#[from] ::redis::RedisError),

    /// Connecting to the store took too long.
    #[error("timed out connecting to lease store after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// A store call got no answer in time. Whether it took effect is unknown.
    #[error("lease store did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

impl LeaseError {
    /// Whether the error reports contention rather than a failure.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}
