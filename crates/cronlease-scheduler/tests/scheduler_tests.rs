//! Trigger and reload behaviour with a recording handler.
//!
//! Entries use six-field expressions firing every second, so these tests run
//! on the real clock and only assert loose lower/upper bounds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::sleep;

use cronlease_scheduler::{
    ReloadController, ScheduleState, Scheduler, SchedulerError, TriggerHandler, read_definitions,
};

/// Counts firings per entry name.
#[derive(Clone, Default)]
struct Recorder {
    fired: Arc<Mutex<HashMap<String, usize>>>,
}

impl Recorder {
    fn handler(&self) -> TriggerHandler {
        let fired = Arc::clone(&self.fired);
        Arc::new(move |entry| {
            *fired.lock().unwrap().entry(entry.name).or_default() += 1;
            Box::pin(async {})
        })
    }

    fn count(&self, name: &str) -> usize {
        self.fired.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

fn every_second(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("- name: {name}\n  cron: \"* * * * * *\"\n  command: [\"true\"]\n"))
        .collect()
}

fn write(dir: &tempfile::TempDir, document: &str) -> std::path::PathBuf {
    let path = dir.path().join("cron.yml");
    std::fs::write(&path, document).unwrap();
    path
}

#[tokio::test]
async fn entries_fire_independently() {
    let recorder = Recorder::default();
    let state = ScheduleState::parse(1, &every_second(&["a", "b"])).unwrap();
    let mut scheduler = Scheduler::new(Arc::new(state), recorder.handler());

    scheduler.start();
    sleep(Duration::from_millis(2500)).await;
    scheduler.stop();

    assert!(recorder.count("a") >= 1);
    assert!(recorder.count("b") >= 1);
    // One firing per second at most.
    assert!(recorder.count("a") <= 3);
}

#[tokio::test]
async fn stopped_scheduler_fires_no_more() {
    let recorder = Recorder::default();
    let state = ScheduleState::parse(1, &every_second(&["a"])).unwrap();
    let mut scheduler = Scheduler::new(Arc::new(state), recorder.handler());

    scheduler.start();
    sleep(Duration::from_millis(1500)).await;
    scheduler.stop();
    assert!(!scheduler.is_running());

    let before = recorder.count("a");
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(recorder.count("a"), before);
}

#[tokio::test]
async fn read_definitions_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();

    let err = read_definitions(&dir.path().join("absent.yml"), 1)
        .await
        .unwrap_err();

    assert!(err.is_read());
}

#[tokio::test]
async fn valid_reload_replaces_all_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, &every_second(&["old-a", "old-b"]));
    let recorder = Recorder::default();

    let state = read_definitions(&path, 1).await.unwrap();
    let mut controller = ReloadController::start(&path, state, recorder.handler());
    assert_eq!(controller.state().names(), vec!["old-a", "old-b"]);

    write(&dir, &every_second(&["new"]));
    let generation = controller.reload().await.unwrap();

    assert_eq!(generation, 2);
    assert_eq!(controller.state().generation(), 2);
    assert_eq!(controller.state().names(), vec!["new"]);

    let old_before = recorder.count("old-a");
    sleep(Duration::from_millis(2500)).await;

    assert!(recorder.count("new") >= 1);
    assert_eq!(recorder.count("old-a"), old_before);

    controller.shutdown();
}

#[tokio::test]
async fn invalid_reload_keeps_previous_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, &every_second(&["keeper"]));
    let recorder = Recorder::default();

    let state = read_definitions(&path, 1).await.unwrap();
    let mut controller = ReloadController::start(&path, state, recorder.handler());

    write(&dir, "- name: broken\n  cron: \"whenever\"\n  command: [\"true\"]\n");
    let err = controller.reload().await.unwrap_err();

    assert!(matches!(err, SchedulerError::Parse(_)));
    assert_eq!(controller.state().generation(), 1);
    assert_eq!(controller.state().names(), vec!["keeper"]);

    // The old triggers are still armed.
    let before = recorder.count("keeper");
    sleep(Duration::from_millis(2500)).await;
    assert!(recorder.count("keeper") > before);

    // A later good document still applies, with the next generation number.
    write(&dir, &every_second(&["fixed"]));
    assert_eq!(controller.reload().await.unwrap(), 2);

    controller.shutdown();
}

#[tokio::test]
async fn reload_of_deleted_file_keeps_previous_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, &every_second(&["keeper"]));
    let recorder = Recorder::default();

    let state = read_definitions(&path, 1).await.unwrap();
    let mut controller = ReloadController::start(&path, state, recorder.handler());

    std::fs::remove_file(&path).unwrap();
    let err = controller.reload().await.unwrap_err();

    assert!(err.is_read());
    assert_eq!(controller.state().names(), vec!["keeper"]);

    controller.shutdown();
}
