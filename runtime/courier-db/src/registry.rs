//! Path-keyed bookkeeping for open database handles.

use crate::sqlite::{EngineConfig, SqliteHandle, DEFAULT_BUSY_TIMEOUT_MS};
use std::collections::HashMap;
use std::time::Duration;

/// Path value denoting a non-persistent, memory-only database.
pub const MEMORY_SENTINEL: &str = ":memory:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenPolicy {
    /// Reopening an open path silently replaces the previous handle.
    Replace,
    /// Reopening an open path is an error.
    Reject,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Closing a path with no open handle is a silent no-op.
    Idempotent,
    /// Closing a path with no open handle is an error.
    Strict,
}

#[derive(Clone, Copy, Debug)]
pub struct RegistryConfig {
    pub open_policy: OpenPolicy,
    pub close_policy: ClosePolicy,
    pub busy_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            open_policy: OpenPolicy::Replace,
            close_policy: ClosePolicy::Idempotent,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

/// Owned map of path -> handle. At most one handle per path; the previous
/// handle is dropped on replacement under `OpenPolicy::Replace`.
pub struct HandleRegistry {
    handles: HashMap<String, SqliteHandle>,
    config: RegistryConfig,
}

impl HandleRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            handles: HashMap::new(),
            config,
        }
    }

    pub fn open(&mut self, path: &str) -> Result<(), String> {
        if self.handles.contains_key(path) && self.config.open_policy == OpenPolicy::Reject {
            return Err(format!("database already open for path: {path}"));
        }
        let engine_config = EngineConfig::for_path(path);
        let handle = SqliteHandle::open(&engine_config, self.config.busy_timeout)
            .map_err(|err| err.to_string())?;
        if let Some(previous) = self.handles.insert(path.to_string(), handle) {
            previous.close();
        }
        Ok(())
    }

    /// Returns whether a handle was actually closed.
    pub fn close(&mut self, path: &str) -> Result<bool, String> {
        match self.handles.remove(path) {
            Some(handle) => {
                handle.close();
                Ok(true)
            }
            None => match self.config.close_policy {
                ClosePolicy::Idempotent => Ok(false),
                ClosePolicy::Strict => Err(format!("database not found for path: {path}")),
            },
        }
    }

    pub fn get_mut(&mut self, path: &str) -> Result<&mut SqliteHandle, String> {
        self.handles
            .get_mut(path)
            .ok_or_else(|| format!("database not found for path: {path}"))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.handles.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
