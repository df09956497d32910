//! State machines for the dispatcher and its workers.

use serde::{Deserialize, Serialize};

use super::ids::WorkerId;

/// Dispatcher lifecycle.
///
/// State transitions:
/// - Idle -> Initializing -> Dispatching -> Draining -> Terminated
/// - Idle -> Terminated (nothing submitted)
/// - Initializing -> Terminated (no worker could be spawned)
/// - Draining -> Dispatching (lost tasks were re-queued)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPhase {
    Idle,

    /// Spawning / connecting workers.
    Initializing,

    /// Pending tasks remain in the queue.
    Dispatching,

    /// Queue exhausted; waiting for in-flight tasks.
    Draining,

    Terminated,
}

impl DispatchPhase {
    pub fn can_transition_to(self, next: DispatchPhase) -> bool {
        use DispatchPhase::*;
        matches!(
            (self, next),
            (Idle, Initializing)
                | (Idle, Terminated)
                | (Initializing, Dispatching)
                | (Initializing, Terminated)
                | (Dispatching, Draining)
                | (Draining, Dispatching)
                | (Draining, Terminated)
        )
    }
}

/// Worker status as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,

    /// Unreachable or unresponsive; never used again in this run.
    Failed,

    /// Removed from the pool (cordoned and drained, or pool stopped).
    Terminated,
}

/// The dispatcher's view of one worker.
///
/// Only the dispatcher mutates status; mutators are crate-private.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    id: WorkerId,
    status: WorkerStatus,

    /// Cordoned workers finish what they hold but get nothing new.
    cordoned: bool,

    tasks_completed: usize,
}

impl WorkerHandle {
    pub(crate) fn new(id: WorkerId) -> Self {
        Self {
            id,
            status: WorkerStatus::Idle,
            cordoned: false,
            tasks_completed: 0,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub fn is_cordoned(&self) -> bool {
        self.cordoned
    }

    pub fn tasks_completed(&self) -> usize {
        self.tasks_completed
    }

    /// Counts toward pool capacity (may receive work now or later).
    pub fn is_healthy(&self) -> bool {
        matches!(self.status, WorkerStatus::Idle | WorkerStatus::Busy) && !self.cordoned
    }

    /// Can take an assignment right now.
    pub fn is_available(&self) -> bool {
        self.status == WorkerStatus::Idle && !self.cordoned
    }

    pub(crate) fn mark_busy(&mut self) {
        self.status = WorkerStatus::Busy;
    }

    pub(crate) fn mark_idle(&mut self) {
        if self.status == WorkerStatus::Busy {
            self.status = WorkerStatus::Idle;
        }
    }

    pub(crate) fn record_completed(&mut self, n: usize) {
        self.tasks_completed += n;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.status = WorkerStatus::Failed;
    }

    pub(crate) fn mark_terminated(&mut self) {
        if self.status != WorkerStatus::Failed {
            self.status = WorkerStatus::Terminated;
        }
    }

    pub(crate) fn cordon(&mut self) {
        self.cordoned = true;
    }
}
