//! Error types for the scheduler.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur loading schedule definitions.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The definitions file could not be read.
    #[error("failed to read definitions from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The definitions document is not valid YAML or has the wrong shape.
    #[error("invalid definitions: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An entry parsed but cannot be run.
    #[error("invalid entry {name:?}: {reason}")]
    InvalidEntry { name: String, reason: String },
}

impl SchedulerError {
    /// Whether the file itself was missing or unreadable (as opposed to malformed).
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read { .. })
    }
}
