//! Failure notifications.
//!
//! When a job fails the executor hands a [`Notification`] to a
//! [`Notifier`]. Delivery is fire-and-forget: a failed send is logged and
//! otherwise ignored, and nothing is retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors a notifier may report.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Delivery failed.
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Per-job notification settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Addresses to notify. Empty means notifications are off.
    pub recipients: Vec<String>,
    /// Sender address.
    pub sender: Option<String>,
    /// Sender display name.
    pub sender_name: Option<String>,
}

impl NotifyConfig {
    /// Whether anybody is listening.
    pub fn is_enabled(&self) -> bool {
        self.recipients.iter().any(|r| !r.trim().is_empty())
    }
}

/// A failure report for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub job: String,
    pub host: String,
    pub config: NotifyConfig,
    /// The job's log file, if it has one.
    pub output: Option<PathBuf>,
    pub message: String,
}

impl Notification {
    /// Subject line, e.g. `[web-1] 'backup' needs some attention!`.
    pub fn subject(&self) -> String {
        format!("[{}] '{}' needs some attention!", self.host, self.job)
    }

    /// Message body pointing at the job's output.
    pub fn body(&self) -> String {
        let output = self
            .output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(no output file)".to_string());
        let sender = self
            .config
            .sender
            .clone()
            .unwrap_or_else(|| format!("cronlet@{}", self.host));

        format!(
            "{}\n\nYou can find its output in {} on {}.\n\nBest,\n{}\n",
            self.message, output, self.host, sender
        )
    }
}

/// Delivers failure notifications.
///
/// # Example
///
/// ```ignore
/// struct Pager;
///
/// #[async_trait]
/// impl Notifier for Pager {
///     async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
///         page_oncall(&notification.subject(), &notification.body()).await
///     }
/// }
/// ```
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one notification.
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Notifier that writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::warn!(
            job = %notification.job,
            recipients = %notification.config.recipients.join(","),
            subject = %notification.subject(),
            "{}",
            notification.message
        );
        Ok(())
    }
}
