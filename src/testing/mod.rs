//! Testing utilities for users of the cronlet library.
//!
//! This module provides helpers for testing jobs without touching the real
//! host:
//!
//! - [`RecordingNotifier`]: A notifier that keeps every notification
//! - [`FailingNotifier`]: A notifier whose deliveries always fail
//! - [`RecordingLauncher`]: A launcher that records requests instead of spawning
//! - [`test_system`]: A fixed host whose lock files live in a test directory

use async_trait::async_trait;
use std::fs::{self, File};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::core::system::SystemInfo;
use crate::dispatcher::{LaunchError, LaunchRequest, ProcessLauncher};
use crate::notify::{Notification, Notifier, NotifyError};

/// Host name reported by [`test_system`].
pub const TEST_HOSTNAME: &str = "test-host";

/// A host description for tests.
///
/// The host is called [`TEST_HOSTNAME`], is not privileged, and places lock
/// files in `dir`.
pub fn test_system(dir: &Path) -> SystemInfo {
    SystemInfo::detect()
        .with_hostname(TEST_HOSTNAME)
        .with_temp_dir(dir)
        .with_privileged(false)
}

/// Contents of a log file, or an empty string if it does not exist.
pub fn read_log(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

/// Write `pid` into the lock file at `path` and age it by `age`.
///
/// Simulates a run that took the lock `age` ago and is still going.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_held_lock(path: &Path, pid: u32, age: Duration) {
    fs::write(path, pid.to_string()).expect("failed to write lock file");
    let file = File::options()
        .write(true)
        .open(path)
        .expect("failed to open lock file");
    file.set_modified(SystemTime::now() - age)
        .expect("failed to age lock file");
}

/// A notifier that records notifications for later inspection.
///
/// # Example
///
/// ```
/// use cronlet::testing::RecordingNotifier;
///
/// let notifier = RecordingNotifier::new();
/// assert_eq!(notifier.count(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications received so far.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// The most recent notification.
    pub fn last(&self) -> Option<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

/// A notifier that fails every delivery.
#[derive(Debug, Clone, Default)]
pub struct FailingNotifier {
    attempts: Arc<AtomicU32>,
}

impl FailingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of deliveries attempted.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError::Delivery("mail server unreachable".into()))
    }
}

/// A launcher that records requests and hands out fake pids.
#[derive(Debug)]
pub struct RecordingLauncher {
    requests: Mutex<Vec<LaunchRequest>>,
    next_pid: AtomicU32,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(10_000),
        }
    }

    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for RecordingLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher for RecordingLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<u32, LaunchError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }
}
