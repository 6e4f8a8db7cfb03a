//! Core identifier and platform types.
//!
//! These types identify individual job runs and describe the host platform
//! that jobs execute on.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a single job run (one execution unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generate a new random RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a RunId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operating system family, as far as job execution cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Unix-like systems (Linux, macOS, BSD).
    Unix,
    /// Windows.
    Windows,
}

impl Platform {
    /// Detect the platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    /// Shell program and its "run this string" flag.
    pub fn shell(&self) -> (&'static str, &'static str) {
        match self {
            Platform::Unix => ("sh", "-c"),
            Platform::Windows => ("cmd", "/C"),
        }
    }

    /// Whether this is a unix-like platform.
    pub fn is_unix(&self) -> bool {
        matches!(self, Platform::Unix)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Unix => write!(f, "unix"),
            Platform::Windows => write!(f, "windows"),
        }
    }
}

/// Make a job name or environment tag safe for use in a file name.
///
/// Lowercases, drops everything outside `[a-z0-9_. -]`, trims, turns
/// spaces into underscores and collapses runs of underscores.
pub fn escape(input: &str) -> String {
    let lowered = input.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '.' | ' ' | '-'))
        .collect();

    let mut escaped = String::with_capacity(kept.len());
    for c in kept.trim().chars() {
        let c = if c == ' ' { '_' } else { c };
        if c == '_' && escaped.ends_with('_') {
            continue;
        }
        escaped.push(c);
    }
    escaped
}
