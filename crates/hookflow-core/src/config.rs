//! Runtime settings consumed by the engine.
//!
//! File and environment loading lives in the server binary; these are the
//! already-resolved values.

use std::path::PathBuf;
use std::time::Duration;

/// Timeout applied to handlers registered without one.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Dispatch loop settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on a single dequeue wait; doubles as the session
    /// completion poll interval.
    pub dequeue_wait: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dequeue_wait: Duration::from_secs(1),
        }
    }
}

/// Execution history settings.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub path: PathBuf,
    pub max_age: Duration,
    pub max_size_bytes: u64,
    pub cleanup_interval: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_size_bytes: 1024 * 1024 * 1024,
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl HistoryConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

pub fn default_history_path() -> PathBuf {
    std::env::temp_dir().join("hookflow").join("history")
}
