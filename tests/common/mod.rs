//! Common test utilities shared across integration tests.

use chrono::{DateTime, TimeZone, Utc};
use cronlet::testing::{RecordingNotifier, test_system};
use cronlet::{Dispatcher, JobConfig, RunOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A dispatcher on a fake host whose files all live in a temp directory.
pub struct Fixture {
    pub dir: TempDir,
    pub notifier: Arc<RecordingNotifier>,
    pub dispatcher: Dispatcher,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = Dispatcher::with_system(test_system(dir.path()))
            .with_notifier(notifier.clone());
        Self {
            dir,
            notifier,
            dispatcher,
        }
    }

    /// Path of `name` inside the fixture directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Register a job, panicking on definition errors.
    pub fn add(&mut self, name: &str, config: JobConfig) {
        self.dispatcher.add(name, config).unwrap();
    }

    /// Lock file of a registered job.
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.dispatcher.executor(name).unwrap().lock_path()
    }

    /// Run one invocation of `name` to completion.
    pub async fn run(&self, name: &str, reference: DateTime<Utc>) -> RunOutcome {
        self.dispatcher.executor(name).unwrap().run(reference).await
    }
}

/// An instant on 2024-01-15 (a Monday), UTC.
pub fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, hour, minute, second).unwrap()
}
