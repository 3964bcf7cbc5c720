//! Schedule entry types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use cronlease_runner::{DEFAULT_MUTEX_TTL, ExecutionRequest, LeaseLossPolicy};

use crate::{CronSchedule, SchedulerError};

/// A named, cron-triggered command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Display name, also the lease name.
    pub name: String,
    /// When to fire.
    pub cron: CronSchedule,
    /// Program and arguments.
    pub command: Vec<String>,
    /// Per-entry overrides of the process-wide defaults.
    #[serde(default)]
    pub options: EntryOptions,
}

/// Per-entry overrides. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    /// Lease TTL in seconds.
    pub mutexttl: Option<u64>,
    /// Hard run-time ceiling in seconds.
    pub ttl: Option<u64>,
    /// Ceiling in seconds of the random delay before acquiring.
    pub randomwait: Option<u64>,
    /// Let the lease lapse instead of renewing it.
    pub fireandforget: Option<bool>,
    /// Kill the command if the lease is taken over.
    pub killonleaseloss: Option<bool>,
}

/// Process-wide settings that entries fall back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionDefaults {
    pub prefix: String,
    pub mutex_ttl: Duration,
    pub lease_loss: LeaseLossPolicy,
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            mutex_ttl: DEFAULT_MUTEX_TTL,
            lease_loss: LeaseLossPolicy::default(),
        }
    }
}

impl ScheduleEntry {
    /// Check what the document shape alone cannot.
    pub(crate) fn validate(&self) -> Result<(), SchedulerError> {
        let invalid = |reason: &str| SchedulerError::InvalidEntry {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.command.is_empty() || self.command[0].is_empty() {
            return Err(invalid("command is empty"));
        }
        if self.options.mutexttl == Some(0) {
            return Err(invalid("mutexttl must be at least one second"));
        }
        Ok(())
    }

    /// Build the execution for one firing, entry options winning over defaults.
    pub fn request(&self, defaults: &ExecutionDefaults) -> ExecutionRequest {
        let options = &self.options;

        let lease_loss = match options.killonleaseloss {
            Some(true) => LeaseLossPolicy::Kill,
            Some(false) => LeaseLossPolicy::Continue,
            None => defaults.lease_loss,
        };

        ExecutionRequest::new(self.name.clone(), self.command.clone())
            .with_prefix(defaults.prefix.clone())
            .with_mutex_ttl(
                options
                    .mutexttl
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.mutex_ttl),
            )
            .with_task_ttl(Duration::from_secs(options.ttl.unwrap_or(0)))
            .with_random_wait(options.randomwait.unwrap_or(0))
            .with_fire_and_forget(options.fireandforget.unwrap_or(false))
            .with_lease_loss(lease_loss)
    }
}
