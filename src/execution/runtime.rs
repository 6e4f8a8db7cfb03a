//! Maximum-runtime detection.
//!
//! Runs cannot be cancelled. Instead each invocation checks, before taking
//! the lock, how long the current holder has had it. The age of the lock is
//! the age of the lock file, but only while the process named in the file
//! is still alive.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use super::executor::JobError;
use crate::core::types::Platform;

/// Decides whether a job has been running for too long.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeGuard {
    platform: Platform,
}

impl RuntimeGuard {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Fail if the lock at `lock_path` has been held for at least `max_runtime`.
    ///
    /// A job without a maximum runtime always passes. Liveness probing is
    /// unix-only, so a configured maximum on windows is an error.
    pub fn check_max_runtime(
        &self,
        lock_path: &Path,
        max_runtime: Option<Duration>,
    ) -> Result<(), JobError> {
        let Some(max_runtime) = max_runtime else {
            return Ok(());
        };

        if self.platform == Platform::Windows {
            return Err(JobError::UnsupportedPlatform(
                "\"maxRuntime\" is not supported on Windows".to_string(),
            ));
        }

        let runtime = lock_lifetime(lock_path).as_secs();
        let max = max_runtime.as_secs();
        if runtime >= max {
            return Err(JobError::MaxRuntimeExceeded {
                max_runtime: max,
                runtime,
            });
        }
        Ok(())
    }
}

impl Default for RuntimeGuard {
    fn default() -> Self {
        Self::new(Platform::current())
    }
}

/// How long the lock at `path` has been held by a live process.
///
/// Zero if the file is missing, empty, not a pid, or names a dead process.
pub fn lock_lifetime(path: &Path) -> Duration {
    let Ok(content) = fs::read_to_string(path) else {
        return Duration::ZERO;
    };
    let Ok(pid) = content.trim().parse::<u32>() else {
        return Duration::ZERO;
    };
    if !is_process_alive(pid) {
        return Duration::ZERO;
    }

    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::ZERO)
}

/// Whether a process with `pid` exists.
///
/// A process we may not signal still counts as alive.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs the permission and existence checks only.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn backdate(path: &Path, secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_no_max_runtime_is_noop() {
        let guard = RuntimeGuard::new(Platform::Windows);
        assert!(guard.check_max_runtime(Path::new("/nonexistent"), None).is_ok());
    }

    #[test]
    fn test_windows_rejects_max_runtime() {
        let guard = RuntimeGuard::new(Platform::Windows);
        let err = guard
            .check_max_runtime(Path::new("/nonexistent"), Some(Duration::from_secs(5)))
            .unwrap_err();
        assert_eq!(err.to_string(), "\"maxRuntime\" is not supported on Windows");
    }

    #[test]
    fn test_missing_lock_file_has_zero_lifetime() {
        let dir = TempDir::new().unwrap();
        assert_eq!(lock_lifetime(&dir.path().join("none.lck")), Duration::ZERO);
    }

    #[test]
    fn test_empty_lock_file_has_zero_lifetime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.lck");
        fs::write(&path, "").unwrap();
        backdate(&path, 60);
        assert_eq!(lock_lifetime(&path), Duration::ZERO);
    }

    #[test]
    fn test_garbage_lock_file_has_zero_lifetime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.lck");
        fs::write(&path, "not a pid").unwrap();
        backdate(&path, 60);
        assert_eq!(lock_lifetime(&path), Duration::ZERO);
    }

    #[cfg(unix)]
    #[test]
    fn test_live_holder_counts_lifetime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.lck");
        fs::write(&path, std::process::id().to_string()).unwrap();
        backdate(&path, 5);

        assert!(lock_lifetime(&path) >= Duration::from_secs(4));

        let guard = RuntimeGuard::new(Platform::Unix);
        let err = guard
            .check_max_runtime(&path, Some(Duration::from_secs(1)))
            .unwrap_err();
        assert!(err.to_string().starts_with("MaxRuntime of 1 secs exceeded! Current runtime: "));
        assert!(guard.check_max_runtime(&path, Some(Duration::from_secs(3600))).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_liveness() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(u32::MAX));
    }
}
