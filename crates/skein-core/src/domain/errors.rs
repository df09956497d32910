use thiserror::Error;

use super::ids::WorkerId;
use super::outcome::ResultSlot;

/// Rejected before anything is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("requested {requested} random streams, at most {max} are available")]
    TooManyStreams { requested: u64, max: u64 },

    #[error("requested {requested} workers, at most {max} are allowed")]
    TooManyWorkers { requested: usize, max: usize },

    #[error("task timeout must be greater than zero")]
    ZeroTimeout,

    #[error("worker pool cannot be resized to zero")]
    EmptyPool,
}

/// A worker could not be reached through its transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to spawn {0}: {1}")]
    Spawn(WorkerId, String),

    #[error("{0} is unreachable: {1}")]
    Unreachable(WorkerId, String),
}

impl TransportError {
    pub fn worker(&self) -> WorkerId {
        match self {
            TransportError::Spawn(w, _) | TransportError::Unreachable(w, _) => *w,
        }
    }
}

/// Run-level failure.
///
/// A run whose tasks individually failed is NOT an error: that is a normal
/// report with `FAILED` slots. `RunError` is reserved for runs that could not
/// be carried out.
#[derive(Debug, Error)]
pub enum RunError<R> {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Every worker failed while tasks were still pending.
    ///
    /// `results` still holds all N slots; the never-dispatched ones are `ABORTED`.
    #[error("worker pool exhausted: {aborted} of {total} tasks aborted")]
    PoolExhausted {
        aborted: usize,
        total: usize,
        results: Vec<ResultSlot<R>>,
    },
}

impl<R> RunError<R> {
    /// Partial results, when the run got far enough to have any.
    pub fn results(&self) -> Option<&[ResultSlot<R>]> {
        match self {
            RunError::Configuration(_) => None,
            RunError::PoolExhausted { results, .. } => Some(results),
        }
    }

    pub fn into_results(self) -> Option<Vec<ResultSlot<R>>> {
        match self {
            RunError::Configuration(_) => None,
            RunError::PoolExhausted { results, .. } => Some(results),
        }
    }
}
