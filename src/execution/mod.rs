//! Job execution engine.
//!
//! This module provides everything one invocation of a job needs: lock
//! files, maximum-runtime detection, shell command bodies and the
//! per-job executor that ties them together.

mod command;
mod executor;
mod lock;
mod runtime;

pub use command::{ShellCommand, ShellCommandBuilder, exit_code, open_log};
pub use executor::{BodyStatus, ExecutionResult, JobError, JobExecutor, RunOutcome, SkipReason};
pub use lock::{LOCK_ATTEMPTS, LOCK_RETRY_DELAY, LockError, LockHandle, LockManager};
pub use runtime::{RuntimeGuard, is_process_alive, lock_lifetime};
