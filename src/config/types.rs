//! Configuration type definitions.
//!
//! A configuration file holds process-wide defaults and a list of named
//! jobs. Every job accepts the same fields as the defaults plus an action
//! and a schedule:
//!
//! ```yaml
//! defaults:
//!   output: logs/cron.log
//!   recipients: [ops@example.com]
//! jobs:
//!   - name: backup
//!     command: ./backup.sh
//!     schedule: "0 3 * * *"
//!     max_runtime: 3600
//!   - name: report
//!     callable: nightly_report
//!     schedule: "@daily"
//! ```
//!
//! A `callable` id must be registered on the dispatcher before the job runs
//! (see [`Dispatcher::register_callable`]). The stock `cronlet` binary
//! registers none, so callable jobs need a binary that embeds the library.
//!
//! [`Dispatcher::register_callable`]: crate::dispatcher::Dispatcher::register_callable

use serde::Deserialize;

use crate::core::job::{JobConfig, JobOptions};

/// A whole configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Defaults merged under every job.
    pub defaults: JobOptions,
    /// Jobs in registration order.
    pub jobs: Vec<JobEntry>,
}

/// One named job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobEntry {
    pub name: String,
    #[serde(flatten)]
    pub config: JobConfig,
}
