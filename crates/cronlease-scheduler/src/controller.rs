//! Reload controller: swaps scheduler generations in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use crate::{ScheduleState, Scheduler, SchedulerError, TriggerHandler};

/// Read and parse a definitions file as the given generation.
pub async fn read_definitions(
    path: &Path,
    generation: u64,
) -> Result<ScheduleState, SchedulerError> {
    let document = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SchedulerError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    ScheduleState::parse(generation, &document)
}

/// Owns the running [`Scheduler`] and replaces it wholesale on reload.
///
/// Executions spawned by an old generation keep running; they hold no
/// reference back to the scheduler that fired them.
pub struct ReloadController {
    path: PathBuf,
    handler: TriggerHandler,
    scheduler: Scheduler,
}

impl ReloadController {
    /// Start scheduling an already loaded first generation.
    pub fn start(path: impl Into<PathBuf>, state: ScheduleState, handler: TriggerHandler) -> Self {
        let mut scheduler = Scheduler::new(Arc::new(state), Arc::clone(&handler));
        scheduler.start();

        Self {
            path: path.into(),
            handler,
            scheduler,
        }
    }

    /// The generation currently armed.
    pub fn state(&self) -> Arc<ScheduleState> {
        Arc::clone(self.scheduler.state())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the definitions file and swap it in.
    ///
    /// On any read or parse error the current generation keeps running
    /// untouched and the error is returned.
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn reload(&mut self) -> Result<u64, SchedulerError> {
        let generation = self.scheduler.state().generation() + 1;

        let state = match read_definitions(&self.path, generation).await {
            Ok(state) => state,
            Err(e) => {
                error!(
                    error = %e,
                    current = generation - 1,
                    "reload failed, keeping current schedule"
                );
                return Err(e);
            }
        };

        let mut next = Scheduler::new(Arc::new(state), Arc::clone(&self.handler));
        self.scheduler.stop();
        next.start();
        self.scheduler = next;

        info!(generation, "schedule reloaded");
        Ok(generation)
    }

    /// Disarm all triggers. In-flight executions are not waited for.
    pub fn shutdown(mut self) {
        self.scheduler.stop();
    }
}
