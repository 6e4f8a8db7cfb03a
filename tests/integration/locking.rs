//! Single-instance locking integration tests.
//!
//! Tests that verify lock files keep overlapping runs of the same job apart
//! and that misuse of the lock manager is reported.

use crate::common::{Fixture, at};
use cronlet::testing::read_log;
use cronlet::{JobConfig, LockError, LockManager, RunOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Test: Acquiring a held path on the same manager is a bug.
#[test]
fn test_double_acquire_is_already_held() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("job.lck");
    let manager = LockManager::new();

    manager.acquire(&path).unwrap();
    assert!(matches!(
        manager.acquire(&path),
        Err(LockError::AlreadyHeld(_))
    ));
}

/// Test: Releasing an unheld path fails every time.
#[test]
fn test_release_without_acquire_is_not_held() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("job.lck");
    let manager = LockManager::new();

    assert!(matches!(manager.release(&path), Err(LockError::NotHeld(_))));

    manager.acquire(&path).unwrap();
    manager.release(&path).unwrap();
    assert!(matches!(manager.release(&path), Err(LockError::NotHeld(_))));
}

/// Test: Lock files persist between runs and are empty when unlocked.
#[tokio::test]
async fn test_lock_file_persists_empty() {
    let mut fixture = Fixture::new();
    fixture.add(
        "persist",
        JobConfig::closure(|_| Ok(Value::Bool(true))).with_schedule("* * * * *"),
    );
    let lock = fixture.lock_path("persist");

    assert!(fixture.run("persist", at(10, 30, 0)).await.is_success());
    assert!(lock.exists());
    assert_eq!(read_log(&lock), "");

    assert!(fixture.run("persist", at(10, 31, 0)).await.is_success());
    assert_eq!(read_log(&lock), "");
}

/// Test: The lock file is namespaced by the environment tag.
#[tokio::test]
async fn test_environment_namespaces_lock_file() {
    let mut fixture = Fixture::new();
    fixture.add(
        "Sync Users",
        JobConfig::closure(|_| Ok(Value::Bool(true)))
            .with_schedule("* * * * *")
            .with_environment("Staging"),
    );

    fixture.run("Sync Users", at(10, 30, 0)).await;

    assert_eq!(fixture.lock_path("Sync Users"), fixture.path("staging-sync_users.lck"));
    assert!(fixture.path("staging-sync_users.lck").exists());
}

/// Test: Overlapping runs of one job execute the body once.
#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_runs_execute_once() {
    let mut fixture = Fixture::new();
    let log = fixture.path("slow.log");
    let runs = Arc::new(AtomicU32::new(0));
    let counter = runs.clone();
    fixture.add(
        "slow",
        JobConfig::closure(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            Ok(Value::Bool(true))
        })
        .with_schedule("* * * * *")
        .with_output(&log)
        .with_recipients(["ops@example.com"]),
    );

    let first = fixture.dispatcher.executor("slow").unwrap();
    let second = fixture.dispatcher.executor("slow").unwrap();

    let running = tokio::spawn(async move { first.run(at(10, 30, 0)).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let overlapping = second.run(at(10, 31, 0)).await;
    let finished = running.await.unwrap();

    assert!(finished.is_success());
    assert!(matches!(overlapping, RunOutcome::LockBusy));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(read_log(&log).contains("INFO: Job is still locked (Lockfile: "));
    assert_eq!(fixture.notifier.count(), 0);
}
