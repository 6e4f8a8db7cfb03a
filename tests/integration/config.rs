//! Configuration workflow integration tests.
//!
//! Tests that verify the complete flow from a YAML file to executed jobs.

use crate::common::at;
use cronlet::testing::{RecordingNotifier, read_log, test_system};
use cronlet::{ConfigError, Dispatcher, DispatcherBuilder, YamlLoader};
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

/// Test: Jobs from YAML run with merged defaults.
#[cfg(unix)]
#[tokio::test]
async fn test_yaml_to_execution() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("logs").join("cron.log");
    let yaml = format!(
        r#"
defaults:
  output: {log}
  recipients: [ops@example.com]
jobs:
  - name: greet
    command: echo hello
    schedule: "30 10 * * *"
  - name: broken
    command: exit 2
    schedule: "*/15 * * * *"
  - name: later
    command: echo never
    schedule: "0 3 * * *"
"#,
        log = log.display()
    );
    let path = dir.path().join("jobs.yaml");
    std::fs::write(&path, yaml).unwrap();

    let notifier = Arc::new(RecordingNotifier::new());
    let mut dispatcher =
        Dispatcher::with_system(test_system(dir.path())).with_notifier(notifier.clone());
    DispatcherBuilder::apply(&mut dispatcher, YamlLoader::load_file(&path).unwrap()).unwrap();

    let report = dispatcher.run_at(at(10, 30, 0)).unwrap();
    assert_eq!(report.job_names(), vec!["greet", "broken"]);
    report.wait().await;

    let content = read_log(&log);
    assert!(content.contains("hello\n"));
    assert!(content.contains("ERROR: Job exited with status '2'."));
    assert!(!content.contains("never"));
    assert_eq!(notifier.count(), 1);
    assert_eq!(notifier.last().unwrap().job, "broken");
}

/// Test: YAML jobs can reference callables registered in code.
#[tokio::test]
async fn test_yaml_callable_reference() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("report.log");
    let yaml = format!(
        r#"
jobs:
  - name: nightly
    callable: build_report
    schedule: "@daily"
    output: {}
"#,
        log.display()
    );

    let mut dispatcher = Dispatcher::with_system(test_system(dir.path()));
    dispatcher.register_callable("build_report", |out| {
        write!(out, "42 rows")?;
        Ok(Value::Bool(true))
    });
    DispatcherBuilder::apply(&mut dispatcher, YamlLoader::parse(&yaml).unwrap()).unwrap();

    let outcome = dispatcher
        .executor("nightly")
        .unwrap()
        .run(chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2024, 1, 16, 0, 0, 0).unwrap())
        .await;

    assert!(outcome.is_success());
    assert_eq!(read_log(&log), "42 rows");
}

/// Test: Duplicate names across YAML and code fail fast.
#[test]
fn test_duplicate_job_from_yaml() {
    let dir = TempDir::new().unwrap();
    let yaml = r#"
jobs:
  - name: dup
    command: "true"
    schedule: "* * * * *"
"#;
    let mut dispatcher = Dispatcher::with_system(test_system(dir.path()));
    DispatcherBuilder::apply(&mut dispatcher, YamlLoader::parse(yaml).unwrap()).unwrap();

    let err = DispatcherBuilder::apply(&mut dispatcher, YamlLoader::parse(yaml).unwrap())
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Dispatch(cronlet::DispatchError::DuplicateJob(_))
    ));
}
