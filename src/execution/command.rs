//! Shell command bodies.
//!
//! [`ShellCommand`] runs a job's command line through the platform shell
//! with its output appended to the job's log files.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cronlet::execution::ShellCommand;
//!
//! # async fn demo() -> std::io::Result<()> {
//! let command = ShellCommand::builder("./backup.sh --full")
//!     .stdout("logs/backup.log")
//!     .build();
//!
//! let status = command.run().await?;
//! println!("backup exited with {status}");
//! # Ok(())
//! # }
//! ```
//!
//! # Output Routing
//!
//! Standard output is appended to the stdout log, or discarded if there is
//! none. Standard error goes to the stderr log; when both streams point at
//! the same file it is opened once and shared. Missing log directories are
//! created.
//!
//! # Running as Another User
//!
//! With `run_as` set on a unix host where the runner is root, the command
//! line is prefixed with `sudo -u <user>`. Anywhere else `run_as` is ignored.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

use crate::core::types::Platform;

/// A command line to run through the platform shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    command: String,
    run_as: Option<String>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    platform: Platform,
    privileged: bool,
}

impl ShellCommand {
    /// Create a new builder for a command line.
    pub fn builder(command: impl Into<String>) -> ShellCommandBuilder {
        ShellCommandBuilder::new(command)
    }

    /// The command line as given.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The command line actually handed to the shell.
    pub fn command_line(&self) -> String {
        match &self.run_as {
            Some(user) if self.platform.is_unix() && self.privileged => {
                format!("sudo -u {} {}", user, self.command)
            }
            _ => self.command.clone(),
        }
    }

    pub fn stdout(&self) -> Option<&Path> {
        self.stdout.as_deref()
    }

    pub fn stderr(&self) -> Option<&Path> {
        self.stderr.as_deref()
    }

    /// Run to completion and return the exit status.
    pub async fn run(&self) -> io::Result<ExitStatus> {
        let (shell, flag) = self.platform.shell();
        let mut cmd = Command::new(shell);
        cmd.arg(flag).arg(self.command_line());
        cmd.stdin(Stdio::null());

        let stdout = match &self.stdout {
            Some(path) => Some(open_log(path)?),
            None => None,
        };
        let stderr = match (&self.stderr, &stdout) {
            (Some(path), Some(out)) if Some(path) == self.stdout.as_ref() => {
                Some(out.try_clone()?)
            }
            (Some(path), _) => Some(open_log(path)?),
            (None, _) => None,
        };

        cmd.stdout(stdout.map(Stdio::from).unwrap_or_else(Stdio::null));
        cmd.stderr(stderr.map(Stdio::from).unwrap_or_else(Stdio::null));

        cmd.status().await
    }
}

/// Numeric exit status; on unix a signal death maps to `128 + signal`.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Open `path` for appending, creating it and its directory as needed.
pub fn open_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Builder for creating `ShellCommand` instances.
#[derive(Debug, Clone)]
pub struct ShellCommandBuilder {
    command: String,
    run_as: Option<String>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    platform: Platform,
    privileged: bool,
}

impl ShellCommandBuilder {
    /// Create a new builder with the given command line.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            run_as: None,
            stdout: None,
            stderr: None,
            platform: Platform::current(),
            privileged: false,
        }
    }

    /// Run as this user when possible.
    pub fn run_as(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }

    /// Append standard output to this file.
    pub fn stdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    /// Append standard error to this file.
    pub fn stderr(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr = Some(path.into());
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Whether the runner is root.
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Build the `ShellCommand`.
    pub fn build(self) -> ShellCommand {
        ShellCommand {
            command: self.command,
            run_as: self.run_as,
            stdout: self.stdout,
            stderr: self.stderr,
            platform: self.platform,
            privileged: self.privileged,
        }
    }
}
