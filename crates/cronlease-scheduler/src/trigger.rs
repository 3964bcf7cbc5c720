//! The production trigger handler: one leased execution per firing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{error, info, warn};

use cronlease_lease::LeaseStore;
use cronlease_runner::LeasedExecution;

use crate::{ExecutionDefaults, ScheduleEntry, TriggerHandler};

/// Handler that runs each fired entry under its lease.
///
/// Output goes to the daemon's own stdout and stderr. The outcome is only
/// logged; nothing flows back to the scheduler.
pub fn lease_trigger(store: Arc<dyn LeaseStore>, defaults: ExecutionDefaults) -> TriggerHandler {
    Arc::new(move |entry: ScheduleEntry| -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let execution = LeasedExecution::new(Arc::clone(&store), entry.request(&defaults));

        Box::pin(async move {
            match execution.run().await {
                Ok(report) => {
                    let code = report.outcome.exit_code();
                    if report.outcome.is_success() {
                        info!(entry = %entry.name, code, "finished running entry");
                    } else {
                        warn!(
                            entry = %entry.name,
                            code,
                            outcome = ?report.outcome,
                            "finished running entry"
                        );
                    }
                }
                Err(e) if e.is_lock_busy() => {
                    info!(entry = %entry.name, "skipped, lease is held elsewhere");
                }
                Err(e) => {
                    error!(entry = %entry.name, error = %e, "error running entry");
                }
            }
        })
    })
}
