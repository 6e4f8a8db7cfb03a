//! Detached process launching.
//!
//! In subprocess mode the dispatcher starts one child per due job and
//! forgets about it. The child writes its own stdout and stderr to
//! `debug.log` when the job has `debug` set, otherwise to the null device.

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::execution::open_log;

/// File detached children log to in debug mode.
pub const DEBUG_LOG: &str = "debug.log";

/// Errors that can occur when launching a child.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The child could not be started.
    #[error("failed to launch '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The output file could not be opened.
    #[error("failed to open launcher output: {0}")]
    Output(#[from] io::Error),
}

/// A fully formed command line to start in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Where the child's stdout and stderr go; `None` discards them.
    pub output: Option<PathBuf>,
}

impl LaunchRequest {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            output: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }
}

/// Starts processes without waiting for them.
pub trait ProcessLauncher: Send + Sync {
    /// Start the request and return the child's pid.
    fn launch(&self, request: &LaunchRequest) -> Result<u32, LaunchError>;
}

/// Launcher detaching children from the caller.
///
/// On unix the child gets its own process group; on windows it is started
/// as a detached process in a new process group.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLauncher;

impl ProcessLauncher for DetachedLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<u32, LaunchError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args);
        cmd.stdin(Stdio::null());

        match &request.output {
            Some(path) => {
                let out: File = open_log(path)?;
                let err = out.try_clone()?;
                cmd.stdout(out);
                cmd.stderr(err);
            }
            None => {
                cmd.stdout(Stdio::null());
                cmd.stderr(Stdio::null());
            }
        }

        detach(&mut cmd);

        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: request.program.clone(),
            source,
        })?;
        Ok(child.id())
    }
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}
