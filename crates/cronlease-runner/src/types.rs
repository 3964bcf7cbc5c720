//! Execution request and outcome types.

use std::process::ExitStatus;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lease TTL used when neither the config nor the caller sets one.
pub const DEFAULT_MUTEX_TTL: Duration = Duration::from_secs(300);

/// What to do when a renewal finds the lease owned by someone else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseLossPolicy {
    /// Log it and let the command run on unprotected.
    #[default]
    Continue,
    /// Kill the command.
    Kill,
}

/// Everything needed to run one guarded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Lease name as given by the caller.
    pub name: String,
    /// Namespace prepended to `name` in the store.
    pub prefix: String,
    /// Program and arguments.
    pub command: Vec<String>,
    /// Lease expiry; renewals fire shortly before it.
    pub mutex_ttl: Duration,
    /// Hard run-time ceiling, after which the command is killed.
    pub task_ttl: Option<Duration>,
    /// Upper bound in seconds of the random delay before acquiring.
    pub random_wait_secs: u64,
    /// Stop renewing at the first renewal point and let the lease lapse.
    pub fire_and_forget: bool,
    pub lease_loss: LeaseLossPolicy,
}

impl ExecutionRequest {
    /// Create a request with default TTL and no optional behaviour.
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            command,
            mutex_ttl: DEFAULT_MUTEX_TTL,
            task_ttl: None,
            random_wait_secs: 0,
            fire_and_forget: false,
            lease_loss: LeaseLossPolicy::default(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_mutex_ttl(mut self, ttl: Duration) -> Self {
        self.mutex_ttl = ttl;
        self
    }

    /// Zero means no ceiling.
    pub fn with_task_ttl(mut self, ttl: Duration) -> Self {
        self.task_ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    pub fn with_random_wait(mut self, secs: u64) -> Self {
        self.random_wait_secs = secs;
        self
    }

    pub fn with_fire_and_forget(mut self, enabled: bool) -> Self {
        self.fire_and_forget = enabled;
        self
    }

    pub fn with_lease_loss(mut self, policy: LeaseLossPolicy) -> Self {
        self.lease_loss = policy;
        self
    }

    /// The key used in the lease store.
    pub fn lease_name(&self) -> String {
        format!("{}{}", self.prefix, self.name)
    }
}

/// How a run that got as far as starting its command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Command exited with status zero.
    Succeeded,
    /// Command exited non-zero or was killed by a signal.
    Failed { code: Option<i32> },
    /// Command was killed after exceeding its task TTL.
    TimedOut,
    /// Command was killed because the lease was taken over.
    LeaseLost,
    /// The wait was cut short from outside; the command may still be running.
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Cancelled)
    }

    /// Process exit status to report for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// Result of a completed execution.
#[derive(Debug)]
pub struct ExecutionReport {
    /// Full lease name, prefix included.
    pub lease: String,
    pub outcome: Outcome,
    /// Exit status of the command, absent when cancelled before it exited.
    pub status: Option<ExitStatus>,
    /// Number of successful lease extensions.
    pub renewals: u32,
    /// The lease was left to expire instead of being released.
    pub lease_abandoned: bool,
}

impl ExecutionReport {
    /// Report for a run cancelled before its command was started.
    pub(crate) fn cancelled(lease: String) -> Self {
        Self {
            lease,
            outcome: Outcome::Cancelled,
            status: None,
            renewals: 0,
            lease_abandoned: false,
        }
    }
}
