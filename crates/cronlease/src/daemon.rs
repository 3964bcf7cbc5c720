//! `daemon` command: run scheduled entries until terminated.
//!
//! - SIGHUP re-reads the definitions file and swaps the schedule
//! - SIGINT/SIGTERM disarm all triggers and exit; in-flight executions are
//!   not waited for

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cronlease_lease::{LeaseStore, RedisLeaseStore};
use cronlease_scheduler::{ReloadController, ScheduleState, lease_trigger, read_definitions};

use crate::config::Settings;
use crate::shutdown::install_shutdown_handler;

/// Delay between attempts to read the definitions file at startup.
const READ_RETRY_INTERVAL: Duration = Duration::from_secs(10);

pub async fn run(settings: &Settings, definitions: PathBuf) -> Result<()> {
    let shutdown = install_shutdown_handler()
        .map_err(|e| miette::miette!("failed to install signal handler: {}", e))?;
    // Registered up front so a SIGHUP during startup is not fatal.
    let mut hangup = signal(SignalKind::hangup())
        .map_err(|e| miette::miette!("failed to install SIGHUP handler: {}", e))?;

    let store = RedisLeaseStore::new(&settings.redis_settings())
        .map_err(|e| miette::miette!("invalid redis settings: {}", e))?;
    let store: Arc<dyn LeaseStore> = Arc::new(store);

    let Some(state) = load_initial(&definitions, READ_RETRY_INTERVAL, &shutdown).await? else {
        info!("shut down before the schedule was loaded");
        return Ok(());
    };

    info!(
        path = %definitions.display(),
        prefix = %settings.mutex.prefix,
        entries = state.entries().len(),
        "daemon starting"
    );

    let handler = lease_trigger(store, settings.execution_defaults());
    let mut controller = ReloadController::start(definitions, state, handler);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                info!("received SIGHUP, reloading schedule");
                // Failures are logged by the controller and leave the schedule untouched.
                let _ = controller.reload().await;
            }
        }
    }

    info!(generation = controller.state().generation(), "daemon stopping");
    controller.shutdown();
    Ok(())
}

/// Read the first generation, retrying while the file cannot be read.
///
/// Returns `None` if shutdown is requested while waiting. A file that reads
/// but does not parse is fatal.
async fn load_initial(
    path: &Path,
    retry_every: Duration,
    shutdown: &CancellationToken,
) -> Result<Option<ScheduleState>> {
    loop {
        match read_definitions(path, 1).await {
            Ok(state) => return Ok(Some(state)),
            Err(e) if e.is_read() => {
                error!(error = %e, retry_in = ?retry_every, "cannot read definitions");
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(retry_every) => {}
                }
            }
            Err(e) => {
                return Err(miette::miette!(
                    "invalid definitions in {}: {}",
                    path.display(),
                    e
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_ENTRY: &str = "- name: tick\n  cron: \"* * * * *\"\n  command: [\"true\"]\n";
    const BROKEN_CRON: &str = "- name: broken\n  cron: \"nope\"\n  command: [\"true\"]\n";

    #[tokio::test]
    async fn initial_load_waits_for_file_to_appear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cron.yml");
        let shutdown = CancellationToken::new();

        let writer_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            tokio::fs::write(&writer_path, ONE_ENTRY).await.unwrap();
        });

        let state = load_initial(&path, Duration::from_millis(50), &shutdown)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state.generation(), 1);
        assert_eq!(state.names(), vec!["tick"]);
    }

    #[tokio::test]
    async fn initial_load_gives_up_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let missing = dir.path().join("missing.yml");

        let state = load_initial(&missing, Duration::from_secs(10), &shutdown)
            .await
            .unwrap();

        assert!(state.is_none());
    }

    #[tokio::test]
    async fn initial_parse_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cron.yml");
        std::fs::write(&path, BROKEN_CRON).unwrap();
        let shutdown = CancellationToken::new();

        let result = load_initial(&path, Duration::from_millis(10), &shutdown).await;

        assert!(result.is_err());
    }
}
