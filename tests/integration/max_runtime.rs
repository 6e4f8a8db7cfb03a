//! Maximum-runtime integration tests.
//!
//! Tests that verify a run holding its lock for too long is reported by the
//! next invocation, which then does not run the body.

use crate::common::{Fixture, at};
use cronlet::testing::{read_log, write_held_lock};
use cronlet::{JobConfig, JobError, Platform, RunOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn counting_job(runs: &Arc<AtomicU32>) -> JobConfig {
    let counter = runs.clone();
    JobConfig::closure(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Bool(true))
    })
    .with_schedule("* * * * *")
}

/// Test: A live holder past the limit aborts the run and notifies.
#[cfg(unix)]
#[tokio::test]
async fn test_exceeded_max_runtime_aborts() {
    let mut fixture = Fixture::new();
    let log = fixture.path("slow.log");
    let runs = Arc::new(AtomicU32::new(0));
    fixture.add(
        "slow",
        counting_job(&runs)
            .with_max_runtime(Duration::from_secs(1))
            .with_output(&log)
            .with_recipients(["ops@example.com"]),
    );

    write_held_lock(&fixture.lock_path("slow"), std::process::id(), Duration::from_secs(5));

    let outcome = fixture.run("slow", at(10, 30, 0)).await;

    assert!(matches!(
        outcome,
        RunOutcome::Aborted(JobError::MaxRuntimeExceeded { max_runtime: 1, .. })
    ));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(read_log(&log).contains("ERROR: MaxRuntime of 1 secs exceeded! Current runtime: "));

    let notification = fixture.notifier.last().unwrap();
    assert!(notification.message.starts_with("MaxRuntime of 1 secs exceeded!"));
}

/// Test: A lock left behind by a dead process does not count.
#[cfg(unix)]
#[tokio::test]
async fn test_stale_lock_from_dead_process_is_ignored() {
    let mut fixture = Fixture::new();
    let runs = Arc::new(AtomicU32::new(0));
    fixture.add(
        "stale",
        counting_job(&runs).with_max_runtime(Duration::from_secs(1)),
    );

    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();
    write_held_lock(&fixture.lock_path("stale"), dead_pid, Duration::from_secs(60));

    let outcome = fixture.run("stale", at(10, 30, 0)).await;

    assert!(outcome.is_success());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.notifier.count(), 0);
}

/// Test: A run within its limit proceeds normally.
#[cfg(unix)]
#[tokio::test]
async fn test_unlocked_job_within_limit_runs() {
    let mut fixture = Fixture::new();
    let runs = Arc::new(AtomicU32::new(0));
    fixture.add(
        "fast",
        counting_job(&runs).with_max_runtime(Duration::from_secs(60)),
    );

    assert!(fixture.run("fast", at(10, 30, 0)).await.is_success());
    assert!(fixture.run("fast", at(10, 31, 0)).await.is_success());
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Test: A maximum runtime on windows is reported as unsupported.
#[tokio::test]
async fn test_max_runtime_unsupported_on_windows() {
    use cronlet::Dispatcher;
    use cronlet::testing::{RecordingNotifier, test_system};

    let dir = tempfile::TempDir::new().unwrap();
    let notifier = Arc::new(RecordingNotifier::new());
    let system = test_system(dir.path()).with_platform(Platform::Windows);
    let mut dispatcher = Dispatcher::with_system(system).with_notifier(notifier.clone());
    let runs = Arc::new(AtomicU32::new(0));
    dispatcher
        .add(
            "win",
            counting_job(&runs)
                .with_max_runtime(Duration::from_secs(10))
                .with_recipients(["ops@example.com"]),
        )
        .unwrap();

    let outcome = dispatcher.executor("win").unwrap().run(at(10, 30, 0)).await;

    assert!(matches!(outcome, RunOutcome::Aborted(JobError::UnsupportedPlatform(_))));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(
        notifier.last().unwrap().message,
        "\"maxRuntime\" is not supported on Windows"
    );
}
