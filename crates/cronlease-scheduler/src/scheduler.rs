//! Cron trigger scheduler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Local;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ScheduleEntry, SchedulerError};

/// Called once per firing; the returned future is spawned detached.
pub type TriggerHandler =
    Arc<dyn Fn(ScheduleEntry) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// One loaded generation of schedule entries. Never modified after parsing.
#[derive(Debug)]
pub struct ScheduleState {
    generation: u64,
    entries: Vec<ScheduleEntry>,
}

impl ScheduleState {
    /// Parse and validate a YAML definitions document.
    pub fn parse(generation: u64, document: &str) -> Result<Self, SchedulerError> {
        // An empty file is an empty schedule, not an error.
        let entries: Vec<ScheduleEntry> = if document.trim().is_empty() {
            Vec::new()
        } else {
            serde_yaml::from_str(document)?
        };

        for entry in &entries {
            entry.validate()?;
        }

        Ok(Self {
            generation,
            entries,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}

/// Arms one trigger per entry of a [`ScheduleState`].
///
/// Stopping only disarms triggers. Executions already handed to the
/// [`TriggerHandler`] are detached tasks and are neither tracked nor awaited.
pub struct Scheduler {
    state: Arc<ScheduleState>,
    handler: TriggerHandler,
    stop: CancellationToken,
    triggers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(state: Arc<ScheduleState>, handler: TriggerHandler) -> Self {
        Self {
            state,
            handler,
            stop: CancellationToken::new(),
            triggers: Vec::new(),
        }
    }

    pub fn state(&self) -> &Arc<ScheduleState> {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        !self.triggers.is_empty() && !self.stop.is_cancelled()
    }

    /// Arm all triggers. Does nothing if already started or stopped.
    pub fn start(&mut self) {
        if !self.triggers.is_empty() || self.stop.is_cancelled() {
            return;
        }

        let generation = self.state.generation();
        info!(generation, entries = self.state.entries().len(), "scheduler starting");

        for entry in self.state.entries() {
            info!(
                generation,
                entry = %entry.name,
                cron = %entry.cron,
                command = ?entry.command,
                "adding entry"
            );
            self.triggers.push(tokio::spawn(trigger_loop(
                generation,
                entry.clone(),
                Arc::clone(&self.handler),
                self.stop.child_token(),
            )));
        }
    }

    /// Disarm all triggers.
    pub fn stop(&mut self) {
        if self.stop.is_cancelled() {
            return;
        }
        info!(generation = self.state.generation(), "scheduler stopping");
        self.stop.cancel();
        self.triggers.clear();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Fire `entry` on every cron match until `stop` is cancelled.
async fn trigger_loop(
    generation: u64,
    entry: ScheduleEntry,
    handler: TriggerHandler,
    stop: CancellationToken,
) {
    let mut after = Local::now();

    loop {
        let Some(next) = entry.cron.next_after(&after) else {
            warn!(generation, entry = %entry.name, "no upcoming match, trigger disarmed");
            return;
        };

        let wait = (next - Local::now()).to_std().unwrap_or_default();
        debug!(generation, entry = %entry.name, next = %next, "trigger armed");

        tokio::select! {
            _ = stop.cancelled() => {
                debug!(generation, entry = %entry.name, "trigger disarmed");
                return;
            }
            _ = sleep(wait) => {}
        }

        info!(generation, entry = %entry.name, "running entry");
        tokio::spawn(handler(entry.clone()));

        // Never fire twice for one match, and skip matches missed while asleep.
        after = next.max(Local::now());
    }
}
