//! In-process job bodies.
//!
//! Callables are registered under a name and referenced from job
//! definitions by that name. An execution unit started as a separate process
//! resolves the name against its own registry, so behavior never has to be
//! serialized across the process boundary.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, RwLock};

/// Error type a callable may fail with.
pub type CallableError = Box<dyn std::error::Error + Send + Sync>;

/// What a callable returns. Only `Ok(Value::Bool(true))` counts as success.
pub type CallableResult = Result<Value, CallableError>;

/// A job body run inside the process.
///
/// The callable writes its output to the supplied [`CapturedOutput`]; the
/// executor appends the captured bytes to the job's stdout log.
pub type JobCallable = Arc<dyn Fn(&mut CapturedOutput) -> CallableResult + Send + Sync>;

/// Buffer standing in for standard output while a callable runs.
#[derive(Debug, Default, Clone)]
pub struct CapturedOutput {
    buffer: Vec<u8>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl io::Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Named table of callables.
#[derive(Default)]
pub struct CallableRegistry {
    callables: RwLock<HashMap<String, JobCallable>>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callable, replacing any previous one with the same id.
    pub fn register<F>(&self, id: impl Into<String>, callable: F)
    where
        F: Fn(&mut CapturedOutput) -> CallableResult + Send + Sync + 'static,
    {
        self.register_arc(id, Arc::new(callable));
    }

    /// Register an already shared callable.
    pub fn register_arc(&self, id: impl Into<String>, callable: JobCallable) {
        let mut callables = self.callables.write().unwrap_or_else(|e| e.into_inner());
        callables.insert(id.into(), callable);
    }

    /// Look up a callable by id.
    pub fn get(&self, id: &str) -> Option<JobCallable> {
        let callables = self.callables.read().unwrap_or_else(|e| e.into_inner());
        callables.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        let callables = self.callables.read().unwrap_or_else(|e| e.into_inner());
        callables.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let callables = self.callables.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = callables.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for CallableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
