//! Leased command execution.
//!
//! A [`LeasedExecution`] takes a named lease, runs one child process while
//! holding it, keeps the lease alive for as long as the process runs (or lets
//! it lapse on purpose in fire-and-forget mode), and releases it once at the
//! end. Contention is reported as [`ExecutionError::LockBusy`], separate from
//! anything that went wrong with the command itself.

mod error;
mod execution;
mod output;
mod types;

pub use error::ExecutionError;
pub use execution::{LeasedExecution, RENEWAL_MARGIN, renewal_interval};
pub use output::OutputSink;
pub use types::{
    DEFAULT_MUTEX_TTL, ExecutionReport, ExecutionRequest, LeaseLossPolicy, Outcome,
};
