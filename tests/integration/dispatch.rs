//! Dispatch and execution integration tests.
//!
//! Tests that verify which jobs run, where their output goes and when
//! operators get notified.

use crate::common::{Fixture, at};
use cronlet::execution::{BodyStatus, SkipReason};
use cronlet::testing::read_log;
use cronlet::{JobConfig, JobError, RunOutcome};
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Test: A callable's output lands in its log and the lock is left unlocked.
#[tokio::test]
async fn test_callable_output_and_unlocked_lock() {
    let mut fixture = Fixture::new();
    let log = fixture.path("out.log");
    fixture.add(
        "hello",
        JobConfig::closure(|out| {
            write!(out, "ok")?;
            Ok(Value::Bool(true))
        })
        .with_schedule("* * * * *")
        .with_output(&log),
    );

    let report = fixture.dispatcher.run_at(at(10, 30, 0)).unwrap();
    assert_eq!(report.job_names(), vec!["hello"]);
    let outcomes = report.wait().await;

    assert!(outcomes[0].1.is_success());
    assert_eq!(read_log(&log), "ok");
    let lock = fixture.lock_path("hello");
    assert_eq!(read_log(&lock), "");
    assert_eq!(fixture.notifier.count(), 0);
}

/// Test: Disabled jobs leave neither a log nor a lock file.
#[tokio::test]
async fn test_disabled_job_leaves_no_trace() {
    let mut fixture = Fixture::new();
    let log = fixture.path("disabled.log");
    fixture.add(
        "disabled",
        JobConfig::command("echo should-not-run")
            .with_schedule("* * * * *")
            .with_output(&log)
            .with_enabled(false),
    );

    let outcome = fixture.run("disabled", at(10, 30, 0)).await;

    assert!(matches!(outcome, RunOutcome::Skipped(SkipReason::Disabled)));
    assert!(!log.exists());
    assert!(!fixture.lock_path("disabled").exists());
}

/// Test: A halt flag suppresses the job until it is removed.
#[tokio::test]
async fn test_halt_flag_suppresses_execution() {
    let mut fixture = Fixture::new();
    let halt_dir = fixture.path("halt");
    std::fs::create_dir_all(&halt_dir).unwrap();
    let runs = Arc::new(AtomicU32::new(0));
    let counter = runs.clone();
    fixture.add(
        "Nightly Report",
        JobConfig::closure(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Bool(true))
        })
        .with_schedule("* * * * *")
        .with_halt_dir(&halt_dir),
    );

    let flag = halt_dir.join("Nightly Report");
    std::fs::write(&flag, "").unwrap();
    let outcome = fixture.run("Nightly Report", at(10, 30, 0)).await;
    assert!(matches!(outcome, RunOutcome::Skipped(SkipReason::Halted)));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    std::fs::remove_file(&flag).unwrap();
    let outcome = fixture.run("Nightly Report", at(10, 31, 0)).await;
    assert!(outcome.is_success());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Test: An absolute timestamp schedule runs only within its minute.
#[tokio::test]
async fn test_absolute_timestamp_runs_once() {
    let mut fixture = Fixture::new();
    fixture.add(
        "once",
        JobConfig::closure(|_| Ok(Value::Bool(true))).with_schedule("2024-01-15 10:30:00"),
    );

    let names = |reference| {
        fixture
            .dispatcher
            .run_at(reference)
            .unwrap()
            .job_names()
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
    };

    assert_eq!(names(at(10, 30, 45)), vec!["once"]);
    assert!(names(at(10, 29, 59)).is_empty());
    assert!(names(at(10, 31, 0)).is_empty());
}

/// Test: Predicate schedules receive the reference instant.
#[tokio::test]
async fn test_predicate_schedule() {
    let mut fixture = Fixture::new();
    fixture.add(
        "even-minutes",
        JobConfig::closure(|_| Ok(Value::Bool(true)))
            .with_schedule_fn(|reference| chrono::Timelike::minute(&reference) % 2 == 0),
    );

    let report = fixture.dispatcher.run_at(at(10, 30, 0)).unwrap();
    assert_eq!(report.job_names(), vec!["even-minutes"]);
    report.wait().await;

    let report = fixture.dispatcher.run_at(at(10, 31, 0)).unwrap();
    assert!(report.is_empty());
}

/// Test: A callable returning anything but `true` is an error.
#[tokio::test]
async fn test_non_true_return_logs_and_notifies() {
    let mut fixture = Fixture::new();
    let log = fixture.path("report.log");
    fixture.add(
        "report",
        JobConfig::closure(|_| Ok(serde_json::json!({"rows": 0})))
            .with_schedule("* * * * *")
            .with_output(&log)
            .with_recipients(["ops@example.com"]),
    );

    let outcome = fixture.run("report", at(10, 30, 0)).await;

    let RunOutcome::Executed(result) = outcome else {
        panic!("expected the body to run");
    };
    assert!(!result.success);
    assert_eq!(
        result.status,
        Some(BodyStatus::Returned(serde_json::json!({"rows": 0})))
    );

    let content = read_log(&log);
    assert!(content.starts_with("[2024-01-15 10:30:00] ERROR: Callable did not return true! Returned:\n"));
    assert!(content.contains("\"rows\": 0"));

    let notification = fixture.notifier.last().unwrap();
    assert_eq!(notification.job, "report");
    assert_eq!(notification.host, "test-host");
    assert_eq!(notification.output.as_deref(), Some(log.as_path()));
    assert!(notification.message.starts_with("Callable did not return true!"));
    assert_eq!(notification.subject(), "[test-host] 'report' needs some attention!");
}

/// Test: Jobs without recipients never notify.
#[tokio::test]
async fn test_no_recipients_no_notification() {
    let mut fixture = Fixture::new();
    fixture.add(
        "quiet-failure",
        JobConfig::closure(|_| Ok(Value::Bool(false))).with_schedule("* * * * *"),
    );

    assert!(!fixture.run("quiet-failure", at(10, 30, 0)).await.is_success());
    assert_eq!(fixture.notifier.count(), 0);
}

/// Test: Jobs pinned to another host are skipped.
#[tokio::test]
async fn test_run_on_other_host_is_skipped() {
    let mut fixture = Fixture::new();
    fixture.add(
        "pinned",
        JobConfig::closure(|_| Ok(Value::Bool(true)))
            .with_schedule("* * * * *")
            .with_run_on_host("db-1"),
    );

    let outcome = fixture.run("pinned", at(10, 30, 0)).await;
    assert!(matches!(outcome, RunOutcome::Skipped(SkipReason::OtherHost)));
}

/// Test: A shell command with a nonzero exit is reported.
#[cfg(unix)]
#[tokio::test]
async fn test_shell_nonzero_exit() {
    let mut fixture = Fixture::new();
    let log = fixture.path("logs").join("failing.log");
    fixture.add(
        "failing",
        JobConfig::command("echo partial; exit 3")
            .with_schedule("* * * * *")
            .with_output(&log)
            .with_recipients(["ops@example.com"]),
    );

    let outcome = fixture.run("failing", at(10, 30, 0)).await;

    let RunOutcome::Executed(result) = outcome else {
        panic!("expected the body to run");
    };
    assert_eq!(result.status, Some(BodyStatus::Exit(3)));
    assert!(matches!(result.error, Some(JobError::NonZeroExit(3))));
    assert_eq!(
        read_log(&log),
        "partial\n[2024-01-15 10:30:00] ERROR: Job exited with status '3'.\n"
    );
    assert_eq!(fixture.notifier.count(), 1);
}

/// Test: An unknown command fails with the shell's "not found" status.
#[cfg(unix)]
#[tokio::test]
async fn test_invalid_command_exit_status() {
    let mut fixture = Fixture::new();
    let log = fixture.path("invalid.log");
    fixture.add(
        "invalid",
        JobConfig::command("definitely-not-a-command-xyz")
            .with_schedule("* * * * *")
            .with_output_stdout(&log)
            .with_recipients(["ops@example.com"]),
    );

    fixture.run("invalid", at(10, 30, 0)).await;

    assert!(read_log(&log).contains("ERROR: Job exited with status '127'."));
    assert_eq!(fixture.notifier.count(), 1);
}

/// Test: Separate stdout and stderr logs receive their own streams.
#[cfg(unix)]
#[tokio::test]
async fn test_split_output_streams() {
    let mut fixture = Fixture::new();
    let out = fixture.path("out.log");
    let err = fixture.path("err.log");
    fixture.add(
        "split",
        JobConfig::command("echo to-out; echo to-err 1>&2")
            .with_schedule("* * * * *")
            .with_output_stdout(&out)
            .with_output_stderr(&err),
    );

    assert!(fixture.run("split", at(10, 30, 0)).await.is_success());
    assert_eq!(read_log(&out), "to-out\n");
    assert_eq!(read_log(&err), "to-err\n");
}

/// Test: A failing notifier does not affect the run.
#[tokio::test]
async fn test_failing_notifier_is_ignored() {
    use cronlet::Dispatcher;
    use cronlet::testing::{FailingNotifier, test_system};

    let dir = tempfile::TempDir::new().unwrap();
    let notifier = Arc::new(FailingNotifier::new());
    let mut dispatcher =
        Dispatcher::with_system(test_system(dir.path())).with_notifier(notifier.clone());
    dispatcher
        .add(
            "flaky",
            JobConfig::closure(|_| Ok(Value::Null))
                .with_schedule("* * * * *")
                .with_recipients(["ops@example.com"]),
        )
        .unwrap();

    let outcome = dispatcher.executor("flaky").unwrap().run(at(10, 30, 0)).await;

    assert!(matches!(outcome, RunOutcome::Executed(_)));
    assert_eq!(notifier.attempts(), 1);
}
