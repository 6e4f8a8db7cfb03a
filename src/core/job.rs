//! Job configuration and definitions.
//!
//! A [`JobConfig`] is what a caller supplies when registering a job: an
//! action, a schedule and any [`JobOptions`] it wants to override. The
//! dispatcher merges it over process-wide defaults into an immutable
//! [`JobDefinition`].

use chrono::format::{Item, StrftimeItems};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::callable::{CallableResult, CapturedOutput, JobCallable};
use super::schedule::{Schedule, ScheduleChecker};
use super::system::{SystemInfo, application_env};
use super::types::escape;
use crate::notify::NotifyConfig;

/// Default strftime format for job log timestamps.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors that can occur when building a job definition.
#[derive(Debug, Error)]
pub enum JobDefinitionError {
    /// The job name is empty.
    #[error("job name must not be empty")]
    EmptyName,

    /// Neither a command nor a callable was given.
    #[error("'command' or 'callable' is required for '{0}' job")]
    MissingAction(String),

    /// More than one action was given.
    #[error("only one of 'command' or 'callable' may be set for '{0}' job")]
    ConflictingActions(String),

    /// No schedule, or an empty one.
    #[error("'schedule' is required for '{0}' job")]
    MissingSchedule(String),

    /// Timezone name not recognized.
    #[error("invalid timezone '{timezone}' for '{job}' job")]
    InvalidTimezone { job: String, timezone: String },

    /// Log timestamp format not understood.
    #[error("invalid date format '{format}' for '{job}' job")]
    InvalidDateFormat { job: String, format: String },
}

/// Optional per-job settings.
///
/// Every field is optional so the same type serves as process-wide defaults
/// and as per-job overrides; [`JobOptions::merge`] layers one over another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Whether the job runs at all.
    pub enabled: Option<bool>,
    /// Maximum runtime in seconds before the next invocation complains.
    pub max_runtime: Option<u64>,
    /// Only run on the host with this name (case-insensitive).
    pub run_on_host: Option<String>,
    /// Directory holding halt flag files named after jobs.
    pub halt_dir: Option<PathBuf>,
    /// Environment tag namespacing the lock file.
    pub environment: Option<String>,
    /// Log file for both streams unless overridden per stream.
    pub output: Option<PathBuf>,
    /// Log file for standard output.
    pub output_stdout: Option<PathBuf>,
    /// Log file for standard error.
    pub output_stderr: Option<PathBuf>,
    /// Run shell commands as this user (unix, root only).
    pub run_as: Option<String>,
    /// Who to notify on failure.
    pub recipients: Option<Vec<String>>,
    /// Notification sender address.
    pub sender: Option<String>,
    /// Notification sender display name.
    pub sender_name: Option<String>,
    /// strftime format for log timestamps.
    pub date_format: Option<String>,
    /// Timezone schedules and timestamps are evaluated in.
    pub timezone: Option<String>,
    /// Keep detached launcher output in `debug.log`.
    pub debug: Option<bool>,
}

impl JobOptions {
    /// Defaults applied to every job before its own options.
    pub fn process_defaults(system: &SystemInfo) -> Self {
        Self {
            enabled: Some(true),
            environment: application_env(),
            sender: Some(format!("cronlet@{}", system.hostname())),
            sender_name: Some("cronlet".to_string()),
            date_format: Some(DEFAULT_DATE_FORMAT.to_string()),
            timezone: Some("UTC".to_string()),
            debug: Some(false),
            ..Self::default()
        }
    }

    /// Layer `over` on top of `self`; fields set in `over` win.
    pub fn merge(self, over: JobOptions) -> JobOptions {
        JobOptions {
            enabled: over.enabled.or(self.enabled),
            max_runtime: over.max_runtime.or(self.max_runtime),
            run_on_host: over.run_on_host.or(self.run_on_host),
            halt_dir: over.halt_dir.or(self.halt_dir),
            environment: over.environment.or(self.environment),
            output: over.output.or(self.output),
            output_stdout: over.output_stdout.or(self.output_stdout),
            output_stderr: over.output_stderr.or(self.output_stderr),
            run_as: over.run_as.or(self.run_as),
            recipients: over.recipients.or(self.recipients),
            sender: over.sender.or(self.sender),
            sender_name: over.sender_name.or(self.sender_name),
            date_format: over.date_format.or(self.date_format),
            timezone: over.timezone.or(self.timezone),
            debug: over.debug.or(self.debug),
        }
    }
}

/// What a caller supplies when adding a job.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    command: Option<String>,
    callable: Option<String>,
    #[serde(skip)]
    closure: Option<JobCallable>,
    schedule: Option<Schedule>,
    #[serde(flatten)]
    options: JobOptions,
}

impl JobConfig {
    /// Empty configuration; set an action and a schedule before adding it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration running a shell command.
    pub fn command(command: impl Into<String>) -> Self {
        Self::new().with_command(command)
    }

    /// Configuration running a callable registered under `id`.
    pub fn callable(id: impl Into<String>) -> Self {
        Self::new().with_callable(id)
    }

    /// Configuration running a closure, registered under the job name when
    /// the job is added.
    pub fn closure<F>(f: F) -> Self
    where
        F: Fn(&mut CapturedOutput) -> CallableResult + Send + Sync + 'static,
    {
        Self::new().with_closure(f)
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_callable(mut self, id: impl Into<String>) -> Self {
        self.callable = Some(id.into());
        self
    }

    pub fn with_closure<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut CapturedOutput) -> CallableResult + Send + Sync + 'static,
    {
        self.closure = Some(std::sync::Arc::new(f));
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<Schedule>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    /// Use a predicate as the schedule.
    pub fn with_schedule_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(chrono::DateTime<chrono::Utc>) -> bool + Send + Sync + 'static,
    {
        self.schedule = Some(Schedule::predicate(f));
        self
    }

    /// Replace all options at once.
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.options.enabled = Some(enabled);
        self
    }

    pub fn with_max_runtime(mut self, max_runtime: Duration) -> Self {
        self.options.max_runtime = Some(max_runtime.as_secs());
        self
    }

    pub fn with_run_on_host(mut self, host: impl Into<String>) -> Self {
        self.options.run_on_host = Some(host.into());
        self
    }

    pub fn with_halt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.halt_dir = Some(dir.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.options.environment = Some(environment.into());
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.output = Some(path.into());
        self
    }

    pub fn with_output_stdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.output_stdout = Some(path.into());
        self
    }

    pub fn with_output_stderr(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.output_stderr = Some(path.into());
        self
    }

    pub fn with_run_as(mut self, user: impl Into<String>) -> Self {
        self.options.run_as = Some(user.into());
        self
    }

    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.recipients = Some(recipients.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.options.date_format = Some(format.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.options.timezone = Some(timezone.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.options.debug = Some(debug);
        self
    }

    pub fn command_line(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn callable_id(&self) -> Option<&str> {
        self.callable.as_deref()
    }

    /// The inline closure, if one was supplied.
    pub fn inline_closure(&self) -> Option<&JobCallable> {
        self.closure.as_ref()
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }
}

impl fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfig")
            .field("command", &self.command)
            .field("callable", &self.callable)
            .field("closure", &self.closure.as_ref().map(|_| ".."))
            .field("schedule", &self.schedule)
            .field("options", &self.options)
            .finish()
    }
}

/// The body of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobAction {
    /// Shell command line.
    Command(String),
    /// Id of a callable in the registry.
    Callable(String),
}

/// A fully resolved, immutable job.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    name: String,
    action: JobAction,
    schedule: Schedule,
    enabled: bool,
    max_runtime: Option<Duration>,
    run_on_host: Option<String>,
    halt_dir: Option<PathBuf>,
    environment: Option<String>,
    output: Option<PathBuf>,
    output_stdout: Option<PathBuf>,
    output_stderr: Option<PathBuf>,
    run_as: Option<String>,
    notify: NotifyConfig,
    date_format: String,
    timezone: Tz,
    debug: bool,
}

impl JobDefinition {
    /// Validate `config` and merge it over `defaults`.
    ///
    /// An inline closure becomes a callable action named after the job; the
    /// caller is responsible for registering it under that name.
    pub fn from_config(
        name: impl Into<String>,
        config: &JobConfig,
        defaults: &JobOptions,
    ) -> Result<Self, JobDefinitionError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(JobDefinitionError::EmptyName);
        }

        let command = config.command.as_ref().filter(|c| !c.trim().is_empty());
        let action = match (command, &config.callable, &config.closure) {
            (Some(command), None, None) => JobAction::Command(command.clone()),
            (None, Some(id), None) => JobAction::Callable(id.clone()),
            (None, None, Some(_)) => JobAction::Callable(name.clone()),
            (None, None, None) => return Err(JobDefinitionError::MissingAction(name)),
            _ => return Err(JobDefinitionError::ConflictingActions(name)),
        };

        let schedule = match &config.schedule {
            Some(schedule) if !schedule.is_empty() => schedule.clone(),
            _ => return Err(JobDefinitionError::MissingSchedule(name)),
        };

        let options = defaults.clone().merge(config.options.clone());

        let timezone_name = options.timezone.unwrap_or_else(|| "UTC".to_string());
        let timezone = timezone_name.parse::<Tz>().map_err(|_| {
            JobDefinitionError::InvalidTimezone {
                job: name.clone(),
                timezone: timezone_name.clone(),
            }
        })?;

        let date_format = options
            .date_format
            .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string());
        if StrftimeItems::new(&date_format).any(|item| matches!(item, Item::Error)) {
            return Err(JobDefinitionError::InvalidDateFormat {
                job: name,
                format: date_format,
            });
        }

        let notify = NotifyConfig {
            recipients: options.recipients.unwrap_or_default(),
            sender: options.sender,
            sender_name: options.sender_name,
        };

        Ok(Self {
            name,
            action,
            schedule,
            enabled: options.enabled.unwrap_or(true),
            max_runtime: options.max_runtime.map(Duration::from_secs),
            run_on_host: options.run_on_host,
            halt_dir: options.halt_dir,
            environment: options.environment.filter(|e| !e.is_empty()),
            output: options.output,
            output_stdout: options.output_stdout,
            output_stderr: options.output_stderr,
            run_as: options.run_as.filter(|u| !u.is_empty()),
            notify,
            date_format,
            timezone,
            debug: options.debug.unwrap_or(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &JobAction {
        &self.action
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime
    }

    pub fn run_on_host(&self) -> Option<&str> {
        self.run_on_host.as_deref()
    }

    pub fn halt_dir(&self) -> Option<&Path> {
        self.halt_dir.as_deref()
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    /// The shared log file, as configured.
    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// Where standard output goes: the stdout log, else the shared log.
    pub fn stdout_log(&self) -> Option<&Path> {
        self.output_stdout.as_deref().or(self.output.as_deref())
    }

    /// Where standard error goes: the stderr log, else the shared log, else
    /// the stdout log.
    pub fn stderr_log(&self) -> Option<&Path> {
        self.output_stderr
            .as_deref()
            .or(self.output.as_deref())
            .or(self.output_stdout.as_deref())
    }

    pub fn run_as(&self) -> Option<&str> {
        self.run_as.as_deref()
    }

    pub fn notify_config(&self) -> &NotifyConfig {
        &self.notify
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Schedule checker for this job's timezone.
    pub fn schedule_checker(&self) -> ScheduleChecker {
        ScheduleChecker::new(self.timezone)
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Lock file path: `<temp_dir>/[<env>-]<name>.lck`, both parts escaped.
    pub fn lock_file(&self, temp_dir: &Path) -> PathBuf {
        let job = escape(&self.name);
        let file = match &self.environment {
            Some(env) => format!("{}-{}.lck", escape(env), job),
            None => format!("{}.lck", job),
        };
        temp_dir.join(file)
    }

    /// Halt flag path: `<halt_dir>/<name>`, name unescaped.
    pub fn halt_file(&self) -> Option<PathBuf> {
        self.halt_dir.as_ref().map(|dir| dir.join(&self.name))
    }
}
