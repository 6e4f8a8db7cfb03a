//! File-backed single-instance locks.
//!
//! A lock is an advisory `flock` on a file in the temp directory. While held
//! the file contains the holder's process id; on release it is truncated to
//! empty. Lock files are never deleted, so an empty file means "unlocked"
//! and a non-empty one means "locked, or left behind by a crashed run".
//!
//! A [`LockManager`] tracks the handles it holds. Acquiring a path twice or
//! releasing a path it does not hold is a bug in the caller and reported as
//! such.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Number of non-blocking lock attempts before giving up.
pub const LOCK_ATTEMPTS: u32 = 5;

/// Pause between lock attempts.
pub const LOCK_RETRY_DELAY: Duration = Duration::from_micros(250);

/// Errors that can occur while acquiring or releasing locks.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another holder has the lock. Expected when runs overlap.
    #[error("Job is still locked (Lockfile: {})!", .0.display())]
    Busy(PathBuf),

    /// This manager already holds the lock.
    #[error("Lock already acquired (Lockfile: {}).", .0.display())]
    AlreadyHeld(PathBuf),

    /// Release of a lock this manager does not hold.
    #[error("Lock NOT held - bug? Lockfile: {}", .0.display())]
    NotHeld(PathBuf),

    /// Filesystem failure.
    #[error("lock file error ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    /// Whether this is the benign "someone else has it" case.
    pub fn is_busy(&self) -> bool {
        matches!(self, LockError::Busy(_))
    }

    fn io(path: &Path, source: io::Error) -> Self {
        LockError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Description of a held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    path: PathBuf,
    pid: u32,
    acquired_at: SystemTime,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Process id written into the lock file.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Modification time of the lock file right after acquisition.
    pub fn acquired_at(&self) -> SystemTime {
        self.acquired_at
    }
}

struct HeldLock {
    file: File,
    handle: LockHandle,
}

/// Acquires and releases lock files, remembering what it holds.
pub struct LockManager {
    held: Mutex<HashMap<PathBuf, HeldLock>>,
    pid: u32,
    attempts: u32,
    retry_delay: Duration,
}

impl LockManager {
    /// Manager writing the current process id into lock files.
    pub fn new() -> Self {
        Self::with_pid(std::process::id())
    }

    /// Manager writing `pid` into lock files.
    pub fn with_pid(pid: u32) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            pid,
            attempts: LOCK_ATTEMPTS,
            retry_delay: LOCK_RETRY_DELAY,
        }
    }

    /// Pause between attempts when the lock is taken elsewhere.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Take the lock at `path`, creating the file if needed.
    pub fn acquire(&self, path: &Path) -> Result<LockHandle, LockError> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.contains_key(path) {
            return Err(LockError::AlreadyHeld(path.to_path_buf()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LockError::io(path, e))?;

        let mut locked = false;
        for attempt in 0..self.attempts {
            if try_lock_exclusive(&file).map_err(|e| LockError::io(path, e))? {
                locked = true;
                break;
            }
            if attempt + 1 < self.attempts {
                std::thread::sleep(self.retry_delay);
            }
        }
        if !locked {
            return Err(LockError::Busy(path.to_path_buf()));
        }

        if let Err(e) = write_pid(&mut file, self.pid) {
            let _ = unlock(&file);
            return Err(LockError::io(path, e));
        }

        let acquired_at = file
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());
        let handle = LockHandle {
            path: path.to_path_buf(),
            pid: self.pid,
            acquired_at,
        };

        held.insert(
            path.to_path_buf(),
            HeldLock {
                file,
                handle: handle.clone(),
            },
        );
        Ok(handle)
    }

    /// Give up the lock at `path`, leaving an empty lock file behind.
    pub fn release(&self, path: &Path) -> Result<(), LockError> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        let Some(lock) = held.remove(path) else {
            return Err(LockError::NotHeld(path.to_path_buf()));
        };

        let truncated = lock.file.set_len(0);
        let unlocked = unlock(&lock.file);
        truncated
            .and(unlocked)
            .map_err(|e| LockError::io(path, e))
    }

    /// Whether this manager holds `path`.
    pub fn is_held(&self, path: &Path) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.contains_key(path)
    }

    /// Handle for a held lock.
    pub fn handle(&self, path: &Path) -> Option<LockHandle> {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.get(path).map(|lock| lock.handle.clone())
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("LockManager")
            .field("pid", &self.pid)
            .field("held", &held.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn write_pid(file: &mut File, pid: u32) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", pid)?;
    file.flush()
}

/// Try to take an exclusive advisory lock without blocking.
///
/// Returns `Ok(false)` if somebody else holds it.
#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(err)
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    match file.try_lock() {
        Ok(()) => Ok(true),
        Err(std::fs::TryLockError::WouldBlock) => Ok(false),
        Err(std::fs::TryLockError::Error(e)) => Err(e),
    }
}

#[cfg(not(unix))]
fn unlock(file: &File) -> io::Result<()> {
    file.unlock()
}
