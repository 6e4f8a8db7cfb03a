//! Facts about the machine jobs run on.
//!
//! [`SystemInfo`] bundles the host name, temp directory, platform and
//! privilege level. Executors and the dispatcher read these through one
//! value so tests can substitute a fake host.

use std::path::{Path, PathBuf};

use super::types::Platform;

/// Host facts consulted during scheduling and execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    platform: Platform,
    hostname: String,
    temp_dir: PathBuf,
    privileged: bool,
    pid: u32,
}

impl SystemInfo {
    /// Detect the facts of the running process.
    pub fn detect() -> Self {
        Self {
            platform: Platform::current(),
            hostname: detect_hostname(),
            temp_dir: std::env::temp_dir(),
            privileged: detect_privileged(),
            pid: std::process::id(),
        }
    }

    /// Override the platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Override the host name.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Override the directory lock files are placed in.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Override whether the process counts as privileged (root).
    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Process id written into lock files.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self::detect()
    }
}

fn detect_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(unix)]
fn detect_privileged() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn detect_privileged() -> bool {
    false
}

/// Application environment tag from `APPLICATION_ENV`, if set and non-empty.
pub fn application_env() -> Option<String> {
    std::env::var("APPLICATION_ENV")
        .ok()
        .filter(|value| !value.is_empty())
}
