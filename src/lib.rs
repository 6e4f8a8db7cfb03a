//! cronlet - a local cron-style job runner.
//!
//! Register named jobs (a shell command or an in-process callable) with a
//! schedule, then call [`Dispatcher::run`] periodically, typically once a
//! minute from crontab. Each due job runs in its own execution unit behind a
//! lock file, so a slow run is never overlapped by the next one.
//!
//! ```rust,no_run
//! use cronlet::{Dispatcher, JobConfig};
//! use serde_json::Value;
//! use std::io::Write;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut dispatcher = Dispatcher::new();
//!
//! dispatcher.add(
//!     "vacuum",
//!     JobConfig::command("psql -c 'VACUUM ANALYZE'")
//!         .with_schedule("0 4 * * *")
//!         .with_max_runtime(std::time::Duration::from_secs(3600))
//!         .with_recipients(["dba@example.com"]),
//! )?;
//!
//! dispatcher.add(
//!     "heartbeat",
//!     JobConfig::closure(|out| {
//!         writeln!(out, "still alive")?;
//!         Ok(Value::Bool(true))
//!     })
//!     .with_schedule("*/5 * * * *")
//!     .with_output("logs/heartbeat.log"),
//! )?;
//!
//! dispatcher.run()?.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod dispatcher;
pub mod execution;
pub mod notify;
pub mod testing;

pub use config::{ConfigError, ConfigFile, DispatcherBuilder, YamlLoader, load_dispatcher_from_file};
pub use core::callable::{CallableRegistry, CallableResult, CapturedOutput, JobCallable};
pub use core::job::{JobAction, JobConfig, JobDefinition, JobDefinitionError, JobOptions};
pub use core::schedule::{CronExpression, Schedule, ScheduleChecker, ScheduleError};
pub use core::system::SystemInfo;
pub use core::types::{Platform, RunId};
pub use dispatcher::{
    DetachedLauncher, DispatchError, DispatchMode, Dispatcher, LaunchError, LaunchRequest,
    ProcessLauncher, RunReport,
};
pub use execution::{
    ExecutionResult, JobError, JobExecutor, LockError, LockHandle, LockManager, RunOutcome,
    RuntimeGuard,
};
pub use notify::{LogNotifier, Notification, Notifier, NotifyConfig, NotifyError};
