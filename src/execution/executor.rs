//! Per-job execution.
//!
//! A [`JobExecutor`] takes one job through one invocation:
//!
//! 1. Check that the previous run has not exceeded its maximum runtime
//! 2. Decide whether the job should run at all
//! 3. Take the job's lock
//! 4. Run the body (shell command or callable) with its output logged
//! 5. Release the lock and drop an empty stdout log
//!
//! Failures are written to the job's log and, unless they are merely
//! informational, handed to the [`Notifier`].

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write as _};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::command::{ShellCommand, exit_code, open_log};
use super::lock::{LockError, LockManager};
use super::runtime::RuntimeGuard;
use crate::core::callable::{CallableRegistry, CapturedOutput};
use crate::core::job::{JobAction, JobDefinition};
use crate::core::schedule::ScheduleError;
use crate::core::system::SystemInfo;
use crate::core::types::RunId;
use crate::notify::{Notification, Notifier};

/// Errors that can end a job invocation.
#[derive(Debug, Error)]
pub enum JobError {
    /// The previous run has held the lock for too long.
    #[error("MaxRuntime of {max_runtime} secs exceeded! Current runtime: {runtime} secs")]
    MaxRuntimeExceeded { max_runtime: u64, runtime: u64 },

    /// A configured feature is not available on this platform.
    #[error("{0}")]
    UnsupportedPlatform(String),

    /// The schedule could not be parsed.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Lock acquisition or release failed.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// A callable returned something other than `true`.
    #[error("Callable did not return true! Returned:\n{0}")]
    NonTrueReturn(String),

    /// A shell command exited with a nonzero status.
    #[error("Job exited with status '{0}'.")]
    NonZeroExit(i32),

    /// No callable is registered under the job's callable id.
    #[error("callable '{0}' is not registered")]
    UnknownCallable(String),

    /// Filesystem or process failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl JobError {
    /// Informational errors are logged but never notified.
    pub fn is_informational(&self) -> bool {
        matches!(self, JobError::Lock(err) if err.is_busy())
    }

    fn io(context: impl Into<String>, source: io::Error) -> Self {
        JobError::Io {
            context: context.into(),
            source,
        }
    }
}

/// How a body finished.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyStatus {
    /// Exit status of a shell command.
    Exit(i32),
    /// Value returned by a callable.
    Returned(Value),
}

/// Outcome of one body invocation.
#[derive(Debug)]
pub struct ExecutionResult {
    pub success: bool,
    /// Bytes captured from a callable. Shell output goes straight to the log.
    pub output: Vec<u8>,
    pub status: Option<BodyStatus>,
    pub error: Option<JobError>,
}

impl ExecutionResult {
    fn success(output: Vec<u8>, status: BodyStatus) -> Self {
        Self {
            success: true,
            output,
            status: Some(status),
            error: None,
        }
    }

    fn failure(output: Vec<u8>, status: Option<BodyStatus>, error: JobError) -> Self {
        Self {
            success: false,
            output,
            status,
            error: Some(error),
        }
    }
}

/// Why a job did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    Halted,
    NotDue,
    OtherHost,
}

/// What happened during one invocation.
#[derive(Debug)]
pub enum RunOutcome {
    /// The job was not eligible.
    Skipped(SkipReason),
    /// The invocation stopped before the body ran.
    Aborted(JobError),
    /// Another run holds the lock.
    LockBusy,
    /// The body ran.
    Executed(ExecutionResult),
}

impl RunOutcome {
    /// Whether the body ran and succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Executed(result) if result.success)
    }
}

/// Runs a single job.
pub struct JobExecutor {
    job: Arc<JobDefinition>,
    system: SystemInfo,
    locks: Arc<LockManager>,
    callables: Arc<CallableRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl JobExecutor {
    /// Create an executor with its own lock manager.
    pub fn new(
        job: Arc<JobDefinition>,
        system: SystemInfo,
        callables: Arc<CallableRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let locks = Arc::new(LockManager::with_pid(system.pid()));
        Self {
            job,
            system,
            locks,
            callables,
            notifier,
        }
    }

    /// Share a lock manager with other executors.
    pub fn with_lock_manager(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = locks;
        self
    }

    pub fn job(&self) -> &JobDefinition {
        &self.job
    }

    /// Path of this job's lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.job.lock_file(self.system.temp_dir())
    }

    /// Run one invocation against `reference`.
    pub async fn run(&self, reference: DateTime<Utc>) -> RunOutcome {
        let run_id = RunId::new();
        let lock_path = self.lock_path();
        tracing::debug!(job = %self.job.name(), run_id = %run_id, "Starting job invocation");

        let guard = RuntimeGuard::new(self.system.platform());
        let max_runtime = self.job.max_runtime();
        let checked = self
            .on_lock_file(move |_, path| guard.check_max_runtime(path, max_runtime))
            .await;
        if let Err(err) = checked {
            self.report(&err, reference).await;
            return RunOutcome::Aborted(err);
        }

        match self.should_run(reference) {
            Ok(None) => {}
            Ok(Some(reason)) => {
                tracing::debug!(job = %self.job.name(), reason = ?reason, "Skipping job");
                return RunOutcome::Skipped(reason);
            }
            Err(err) => {
                self.report(&err, reference).await;
                return RunOutcome::Aborted(err);
            }
        }

        let acquired = self
            .on_lock_file(|locks, path| locks.acquire(path).map_err(JobError::from))
            .await;
        if let Err(err) = acquired {
            self.report(&err, reference).await;
            return if err.is_informational() {
                RunOutcome::LockBusy
            } else {
                RunOutcome::Aborted(err)
            };
        }
        tracing::info!(
            job = %self.job.name(),
            run_id = %run_id,
            lock = %lock_path.display(),
            "Lock acquired, running job"
        );

        let result = self.execute_body().await;
        if let Some(err) = &result.error {
            self.report(err, reference).await;
        }

        let released = self
            .on_lock_file(|locks, path| locks.release(path).map_err(JobError::from))
            .await;
        if let Err(err) = released {
            self.report(&err, reference).await;
        }

        self.cleanup();

        tracing::info!(
            job = %self.job.name(),
            run_id = %run_id,
            success = result.success,
            "Job finished"
        );
        RunOutcome::Executed(result)
    }

    /// Run `f` against the lock manager and lock path on the blocking pool.
    ///
    /// Lock attempts sleep between retries and all lock work is file I/O.
    async fn on_lock_file<T, F>(&self, f: F) -> Result<T, JobError>
    where
        F: FnOnce(&LockManager, &Path) -> Result<T, JobError> + Send + 'static,
        T: Send + 'static,
    {
        let locks = self.locks.clone();
        let path = self.lock_path();
        tokio::task::spawn_blocking(move || f(&locks, &path))
            .await
            .map_err(|e| JobError::io("lock file task failed", io::Error::other(e)))?
    }

    /// `Ok(None)` when the job should run, otherwise the first reason it
    /// should not.
    fn should_run(&self, reference: DateTime<Utc>) -> Result<Option<SkipReason>, JobError> {
        if !self.job.is_enabled() {
            return Ok(Some(SkipReason::Disabled));
        }

        if let Some(halt_file) = self.job.halt_file()
            && halt_file.exists()
        {
            return Ok(Some(SkipReason::Halted));
        }

        let checker = self.job.schedule_checker();
        if !checker.is_due(self.job.schedule(), reference)? {
            return Ok(Some(SkipReason::NotDue));
        }

        if let Some(host) = self.job.run_on_host()
            && !host.eq_ignore_ascii_case(self.system.hostname())
        {
            return Ok(Some(SkipReason::OtherHost));
        }

        Ok(None)
    }

    async fn execute_body(&self) -> ExecutionResult {
        match self.job.action() {
            JobAction::Command(command) => self.run_command(command).await,
            JobAction::Callable(id) => self.run_callable(id).await,
        }
    }

    async fn run_command(&self, command: &str) -> ExecutionResult {
        let mut builder = ShellCommand::builder(command)
            .platform(self.system.platform())
            .privileged(self.system.is_privileged());
        if let Some(user) = self.job.run_as() {
            builder = builder.run_as(user);
        }
        if let Some(path) = self.job.stdout_log() {
            builder = builder.stdout(path);
        }
        if let Some(path) = self.job.stderr_log() {
            builder = builder.stderr(path);
        }
        let shell = builder.build();

        tracing::debug!(job = %self.job.name(), command = %shell.command_line(), "Running command");
        match shell.run().await {
            Ok(status) => {
                let code = exit_code(&status);
                if status.success() {
                    ExecutionResult::success(Vec::new(), BodyStatus::Exit(code))
                } else {
                    ExecutionResult::failure(
                        Vec::new(),
                        Some(BodyStatus::Exit(code)),
                        JobError::NonZeroExit(code),
                    )
                }
            }
            Err(e) => ExecutionResult::failure(
                Vec::new(),
                None,
                JobError::io(format!("failed to start '{}'", command), e),
            ),
        }
    }

    async fn run_callable(&self, id: &str) -> ExecutionResult {
        let Some(callable) = self.callables.get(id) else {
            return ExecutionResult::failure(
                Vec::new(),
                None,
                JobError::UnknownCallable(id.to_string()),
            );
        };

        let joined = tokio::task::spawn_blocking(move || {
            let mut out = CapturedOutput::new();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callable(&mut out)));
            (out.into_bytes(), result)
        })
        .await;

        let (output, returned) = match joined {
            Ok((output, Ok(Ok(value)))) => (output, Ok(value)),
            Ok((output, Ok(Err(err)))) => (output, Err(err.to_string())),
            Ok((output, Err(panic))) => (output, Err(panic_message(panic.as_ref()))),
            Err(err) => (Vec::new(), Err(err.to_string())),
        };

        if !output.is_empty()
            && let Some(path) = self.job.stdout_log()
            && let Err(e) = append(path, &output)
        {
            tracing::warn!(job = %self.job.name(), error = %e, "Failed to write job output");
        }

        match returned {
            Ok(Value::Bool(true)) => {
                ExecutionResult::success(output, BodyStatus::Returned(Value::Bool(true)))
            }
            Ok(value) => {
                let rendering = render(&value);
                ExecutionResult::failure(
                    output,
                    Some(BodyStatus::Returned(value)),
                    JobError::NonTrueReturn(rendering),
                )
            }
            Err(message) => {
                if let Some(path) = self.job.stderr_log()
                    && let Err(e) = append(path, format!("Error! {}\n", message).as_bytes())
                {
                    tracing::warn!(job = %self.job.name(), error = %e, "Failed to write job error");
                }
                ExecutionResult::failure(output, None, JobError::NonTrueReturn(message))
            }
        }
    }

    /// Log `err` and notify unless it is informational.
    async fn report(&self, err: &JobError, reference: DateTime<Utc>) {
        let message = err.to_string();
        if err.is_informational() {
            tracing::info!(job = %self.job.name(), "{}", message);
            self.log_line("INFO", &message, reference);
            return;
        }

        tracing::error!(job = %self.job.name(), "{}", message);
        self.log_line("ERROR", &message, reference);
        self.notify(message).await;
    }

    async fn notify(&self, message: String) {
        let config = self.job.notify_config();
        if !config.is_enabled() {
            return;
        }

        let notification = Notification {
            job: self.job.name().to_string(),
            host: self.system.hostname().to_string(),
            config: config.clone(),
            output: self
                .job
                .stdout_log()
                .or(self.job.stderr_log())
                .map(Path::to_path_buf),
            message,
        };

        match self.notifier.notify(&notification).await {
            Ok(()) => tracing::debug!(job = %self.job.name(), "Notification sent"),
            Err(e) => tracing::warn!(job = %self.job.name(), error = %e, "Failed to send notification"),
        }
    }

    /// Append `[<timestamp>] <LEVEL>: <message>` to the job's error log.
    fn log_line(&self, level: &str, message: &str, reference: DateTime<Utc>) {
        let Some(path) = self.job.stderr_log() else {
            return;
        };

        let local = reference.with_timezone(&self.job.timezone());
        let mut timestamp = String::new();
        if write!(timestamp, "{}", local.format(self.job.date_format())).is_err() {
            timestamp = local.to_rfc3339();
        }

        let line = format!("[{}] {}: {}\n", timestamp, level, message);
        if let Err(e) = append(path, line.as_bytes()) {
            tracing::warn!(job = %self.job.name(), error = %e, "Failed to write job log");
        }
    }

    fn cleanup(&self) {
        let Some(path) = self.job.stdout_log() else {
            return;
        };
        if let Ok(metadata) = fs::metadata(path)
            && metadata.len() == 0
            && let Err(e) = fs::remove_file(path)
        {
            tracing::warn!(job = %self.job.name(), error = %e, "Failed to remove empty log");
        }
    }
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("job", &self.job.name())
            .field("system", &self.system)
            .field("locks", &self.locks)
            .finish()
    }
}

fn append(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = open_log(path)?;
    file.write_all(bytes)
}

fn render(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "callable panicked".to_string()
    }
}
