//! Job registration and dispatch.
//!
//! The [`Dispatcher`] holds every registered job together with the
//! process-wide defaults they were merged over. Each call to
//! [`Dispatcher::run`] captures one reference instant, works out which jobs
//! are due at that instant and starts an independent execution unit for
//! each of them. It never waits for the units it starts.
//!
//! Units are either tokio tasks in the current runtime or detached child
//! processes started through a [`ProcessLauncher`]. A child re-resolves its
//! job by name from its own configuration, so callables never leave the
//! process they were registered in.
//!
//! # Example
//!
//! ```rust,no_run
//! use cronlet::{Dispatcher, JobConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.add(
//!     "backup",
//!     JobConfig::command("./backup.sh")
//!         .with_schedule("0 3 * * *")
//!         .with_output("logs/backup.log"),
//! )?;
//!
//! let report = dispatcher.run()?;
//! report.wait().await;
//! # Ok(())
//! # }
//! ```

mod launcher;

pub use launcher::{DEBUG_LOG, DetachedLauncher, LaunchError, LaunchRequest, ProcessLauncher};

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::core::callable::{CallableRegistry, CallableResult, CapturedOutput};
use crate::core::job::{JobAction, JobConfig, JobDefinition, JobDefinitionError, JobOptions};
use crate::core::system::SystemInfo;
use crate::execution::{JobExecutor, RunOutcome};
use crate::notify::{LogNotifier, Notifier};

/// Errors that can occur when registering or dispatching jobs.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The job configuration is invalid.
    #[error(transparent)]
    InvalidJobDefinition(#[from] JobDefinitionError),

    /// A job with this name is already registered.
    #[error("job '{0}' is already registered")]
    DuplicateJob(String),

    /// Dispatch is not possible in this environment.
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// No job with this name is registered.
    #[error("job not found: {0}")]
    UnknownJob(String),
}

/// How execution units are started.
#[derive(Clone, Default)]
pub enum DispatchMode {
    /// One tokio task per due job in the current runtime.
    #[default]
    InProcess,
    /// One detached child process per due job.
    ///
    /// Each child is started as `<program> <args..> <job> --at <reference>`.
    Subprocess {
        launcher: Arc<dyn ProcessLauncher>,
        program: PathBuf,
        args: Vec<String>,
    },
}

impl fmt::Debug for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::InProcess => write!(f, "InProcess"),
            DispatchMode::Subprocess { program, args, .. } => f
                .debug_struct("Subprocess")
                .field("program", program)
                .field("args", args)
                .finish(),
        }
    }
}

/// A started execution unit.
#[derive(Debug)]
pub enum UnitHandle {
    /// In-process task.
    Task(JoinHandle<RunOutcome>),
    /// Child process id.
    Process(u32),
}

/// One job dispatched by a run.
#[derive(Debug)]
pub struct DispatchedUnit {
    pub job: String,
    pub handle: UnitHandle,
}

/// What a single [`Dispatcher::run`] started.
#[derive(Debug)]
pub struct RunReport {
    pub reference: DateTime<Utc>,
    pub units: Vec<DispatchedUnit>,
}

impl RunReport {
    /// Names of the dispatched jobs, in registration order.
    pub fn job_names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.job.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Wait for in-process units and collect their outcomes.
    ///
    /// Child processes are not waited for and do not appear in the result.
    pub async fn wait(self) -> Vec<(String, RunOutcome)> {
        let mut outcomes = Vec::new();
        for unit in self.units {
            let UnitHandle::Task(handle) = unit.handle else {
                continue;
            };
            match handle.await {
                Ok(outcome) => outcomes.push((unit.job, outcome)),
                Err(e) => tracing::warn!(job = %unit.job, error = %e, "Execution unit failed"),
            }
        }
        outcomes
    }
}

/// Registry of jobs and the entry point of a scheduling pass.
pub struct Dispatcher {
    defaults: JobOptions,
    jobs: Vec<Arc<JobDefinition>>,
    callables: Arc<CallableRegistry>,
    notifier: Arc<dyn Notifier>,
    system: SystemInfo,
    mode: DispatchMode,
}

impl Dispatcher {
    /// Dispatcher for the current host, running units in-process.
    pub fn new() -> Self {
        Self::with_system(SystemInfo::detect())
    }

    /// Dispatcher for a given host description.
    pub fn with_system(system: SystemInfo) -> Self {
        Self {
            defaults: JobOptions::default(),
            jobs: Vec::new(),
            callables: Arc::new(CallableRegistry::new()),
            notifier: Arc::new(LogNotifier),
            system,
            mode: DispatchMode::InProcess,
        }
    }

    /// Merge `defaults` into the process-wide defaults.
    ///
    /// Applies to jobs added afterwards.
    pub fn set_defaults(&mut self, defaults: JobOptions) {
        self.defaults = std::mem::take(&mut self.defaults).merge(defaults);
    }

    pub fn with_defaults(mut self, defaults: JobOptions) -> Self {
        self.set_defaults(defaults);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Use a shared callable registry.
    pub fn with_callables(mut self, callables: Arc<CallableRegistry>) -> Self {
        self.callables = callables;
        self
    }

    /// Start units as detached children of `program`.
    pub fn with_subprocess(
        mut self,
        launcher: Arc<dyn ProcessLauncher>,
        program: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Self {
        self.mode = DispatchMode::Subprocess {
            launcher,
            program: program.into(),
            args,
        };
        self
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Effective defaults: built-in process defaults under the configured ones.
    pub fn defaults(&self) -> JobOptions {
        JobOptions::process_defaults(&self.system).merge(self.defaults.clone())
    }

    pub fn system(&self) -> &SystemInfo {
        &self.system
    }

    pub fn mode(&self) -> &DispatchMode {
        &self.mode
    }

    pub fn callables(&self) -> &Arc<CallableRegistry> {
        &self.callables
    }

    /// Register a callable that jobs can reference by id.
    pub fn register_callable<F>(&self, id: impl Into<String>, callable: F)
    where
        F: Fn(&mut CapturedOutput) -> CallableResult + Send + Sync + 'static,
    {
        self.callables.register(id, callable);
    }

    /// Register a job.
    ///
    /// An inline closure is registered as a callable under the job's name.
    pub fn add(&mut self, name: impl Into<String>, config: JobConfig) -> Result<(), DispatchError> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(DispatchError::DuplicateJob(name));
        }

        let job = JobDefinition::from_config(name, &config, &self.defaults())?;
        if let Some(closure) = config.inline_closure() {
            self.callables.register_arc(job.name(), closure.clone());
        }

        tracing::debug!(job = %job.name(), action = ?job.action(), "Registered job");
        self.jobs.push(Arc::new(job));
        Ok(())
    }

    /// Registered jobs in registration order.
    pub fn jobs(&self) -> &[Arc<JobDefinition>] {
        &self.jobs
    }

    pub fn get(&self, name: &str) -> Option<&Arc<JobDefinition>> {
        self.jobs.iter().find(|job| job.name() == name)
    }

    /// Jobs whose callable id has nothing registered under it, as
    /// `(job, callable id)` pairs.
    pub fn unresolved_callables(&self) -> Vec<(&str, &str)> {
        self.jobs
            .iter()
            .filter_map(|job| match job.action() {
                JobAction::Callable(id) if !self.callables.contains(id) => {
                    Some((job.name(), id.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    /// Executor for a registered job.
    pub fn executor(&self, name: &str) -> Result<JobExecutor, DispatchError> {
        let job = self
            .get(name)
            .ok_or_else(|| DispatchError::UnknownJob(name.to_string()))?;
        Ok(JobExecutor::new(
            job.clone(),
            self.system.clone(),
            self.callables.clone(),
            self.notifier.clone(),
        ))
    }

    /// Dispatch every job due now.
    pub fn run(&self) -> Result<RunReport, DispatchError> {
        self.run_at(Utc::now())
    }

    /// Dispatch every job due at `reference`.
    ///
    /// A job whose schedule cannot be evaluated is dispatched anyway so that
    /// its execution unit reports the problem.
    pub fn run_at(&self, reference: DateTime<Utc>) -> Result<RunReport, DispatchError> {
        if self.system.platform().is_unix() && !cfg!(unix) {
            return Err(DispatchError::UnsupportedEnvironment(
                "unix dispatch needs process liveness probing".to_string(),
            ));
        }
        let runtime = match self.mode {
            DispatchMode::InProcess => Some(Handle::try_current().map_err(|_| {
                DispatchError::UnsupportedEnvironment(
                    "in-process dispatch needs a tokio runtime".to_string(),
                )
            })?),
            DispatchMode::Subprocess { .. } => None,
        };

        let mut units = Vec::new();
        for job in &self.jobs {
            let due = match job.schedule_checker().is_due(job.schedule(), reference) {
                Ok(due) => due,
                Err(e) => {
                    tracing::warn!(job = %job.name(), error = %e, "Schedule check failed, dispatching anyway");
                    true
                }
            };
            if !due {
                tracing::debug!(job = %job.name(), "Job not due");
                continue;
            }

            let handle = match (&self.mode, &runtime) {
                (DispatchMode::Subprocess { launcher, program, args }, _) => {
                    let mut request = LaunchRequest::new(program.clone())
                        .args(args.iter().cloned())
                        .arg(job.name())
                        .arg("--at")
                        .arg(reference.to_rfc3339());
                    if job.is_debug() {
                        request = request.output(DEBUG_LOG);
                    }
                    match launcher.launch(&request) {
                        Ok(pid) => UnitHandle::Process(pid),
                        Err(e) => {
                            tracing::error!(job = %job.name(), error = %e, "Failed to launch job");
                            continue;
                        }
                    }
                }
                (DispatchMode::InProcess, Some(runtime)) => {
                    let executor = JobExecutor::new(
                        job.clone(),
                        self.system.clone(),
                        self.callables.clone(),
                        self.notifier.clone(),
                    );
                    UnitHandle::Task(runtime.spawn(async move { executor.run(reference).await }))
                }
                (DispatchMode::InProcess, None) => continue,
            };

            tracing::info!(job = %job.name(), "Dispatched job");
            units.push(DispatchedUnit {
                job: job.name().to_string(),
                handle,
            });
        }

        Ok(RunReport { reference, units })
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("defaults", &self.defaults)
            .field("jobs", &self.jobs.iter().map(|j| j.name()).collect::<Vec<_>>())
            .field("system", &self.system)
            .field("mode", &self.mode)
            .finish()
    }
}
