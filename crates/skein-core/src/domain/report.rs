//! What a finished run hands back to the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{RunId, WorkerId};
use super::outcome::{OutcomeKind, ResultSlot};
use super::policy::SchedulingPolicy;
use super::state::WorkerStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every slot was filled by a worker (values and per-task failures).
    Completed,

    /// `RunControl::cancel` was called; never-started tasks are `CANCELLED`.
    Cancelled,
}

/// Slot counts by outcome kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub aborted: usize,
}

impl RunCounts {
    pub fn from_slots<R>(slots: &[ResultSlot<R>]) -> Self {
        let mut counts = RunCounts::default();
        for slot in slots {
            match slot.kind() {
                OutcomeKind::Success => counts.succeeded += 1,
                OutcomeKind::Failure => counts.failed += 1,
                OutcomeKind::Cancelled => counts.cancelled += 1,
                OutcomeKind::Aborted => counts.aborted += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled + self.aborted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub tasks_completed: usize,
}

/// Result of one `Dispatcher::run`.
///
/// `results[i]` always belongs to submission index `i`, and
/// `results.len()` always equals the number of submitted arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport<R> {
    pub run_id: RunId,
    pub policy: SchedulingPolicy,
    pub seed: u64,

    pub requested_workers: usize,
    pub workers_spawned: usize,

    pub results: Vec<ResultSlot<R>>,
    pub termination: Termination,
    pub counts: RunCounts,
    pub workers: Vec<WorkerSummary>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Wall time measured with a monotonic clock.
    pub makespan: Duration,
}

impl<R> RunReport<R> {
    pub fn into_values(self) -> Vec<Option<R>> {
        self.results
            .into_iter()
            .map(|slot| slot.outcome.into_value())
            .collect()
    }

    pub fn is_fully_successful(&self) -> bool {
        self.counts.succeeded == self.results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::{FailureCause, Outcome};

    fn slot(index: usize, outcome: Outcome<u32>) -> ResultSlot<u32> {
        ResultSlot {
            index,
            outcome,
            completion_order: None,
            worker: None,
        }
    }

    #[test]
    fn counts_each_kind() {
        let slots = vec![
            slot(0, Outcome::Value(1)),
            slot(1, Outcome::Value(2)),
            slot(2, Outcome::failed(2, FailureCause::TimedOut { after_ms: 10 })),
            slot(3, Outcome::Cancelled),
            slot(4, Outcome::Aborted),
        ];
        let counts = RunCounts::from_slots(&slots);
        assert_eq!(
            counts,
            RunCounts {
                succeeded: 2,
                failed: 1,
                cancelled: 1,
                aborted: 1,
            }
        );
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn empty_slots_count_zero() {
        let counts = RunCounts::from_slots::<u32>(&[]);
        assert_eq!(counts, RunCounts::default());
    }
}
