//! Cron scheduler for leased executions.
//!
//! This crate provides a scheduler that:
//! - Loads named, cron-triggered entries from a YAML definitions file
//! - Fires every entry independently, one detached execution per trigger
//! - Swaps in a new generation of entries on reload without touching
//!   executions that are already running

mod controller;
mod cron;
mod error;
mod scheduler;
mod trigger;
mod types;

pub use controller::{ReloadController, read_definitions};
pub use cron::CronSchedule;
pub use error::SchedulerError;
pub use scheduler::{ScheduleState, Scheduler, TriggerHandler};
pub use trigger::lease_trigger;
pub use types::{EntryOptions, ExecutionDefaults, ScheduleEntry};
