//! Dispatcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::ConfigurationError;
use super::policy::SchedulingPolicy;

/// Upper bound on pool size, initial or resized.
pub const MAX_WORKERS: usize = 1024;

/// Knobs for one dispatcher.
///
/// Missing JSON fields fall back to `Default`, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Requested pool size. `0` runs every task sequentially in the caller.
    pub workers: usize,

    pub policy: SchedulingPolicy,

    /// Master seed. Same seed, same per-index streams.
    pub seed: u64,

    /// Per-task deadline.
    pub task_timeout_ms: Option<u64>,

    /// Slack added to the watchdog on top of `task_timeout_ms × tasks`.
    pub unresponsive_grace_ms: u64,

    /// Re-queue tasks of a lost worker instead of failing them.
    pub reassign_lost_tasks: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            policy: SchedulingPolicy::Static,
            seed: 1,
            task_timeout_ms: None,
            unresponsive_grace_ms: 5_000,
            reassign_lost_tasks: false,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_WORKERS)
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.workers > MAX_WORKERS {
            return Err(ConfigurationError::TooManyWorkers {
                requested: self.workers,
                max: MAX_WORKERS,
            });
        }
        if self.task_timeout_ms == Some(0) {
            return Err(ConfigurationError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    pub fn unresponsive_grace(&self) -> Duration {
        Duration::from_millis(self.unresponsive_grace_ms)
    }

    /// Read a JSON config file.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
