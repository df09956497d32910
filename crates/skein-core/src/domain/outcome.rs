//! Outcome model: what ended up in each task's result slot.
//!
//! This module is transport-agnostic: it only defines the "shape" of results
//! so that a transport can serialize them and a caller can inspect them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::WorkerId;

/// A unified classification of a slot.
///
/// Serialized as SCREAMING_SNAKE_CASE: SUCCESS / FAILURE / CANCELLED / ABORTED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
    Cancelled,
    Aborted,
}

/// Why a single task produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    /// The user function returned `Err`.
    #[error("task returned an error: {message}")]
    Error { message: String },

    /// The user function panicked; the panic was contained to this task.
    #[error("task panicked: {message}")]
    Panicked { message: String },

    #[error("task exceeded its deadline of {after_ms}ms")]
    TimedOut { after_ms: u64 },

    /// The worker running the task became unreachable.
    #[error("{worker} was lost: {reason}")]
    WorkerLost { worker: WorkerId, reason: String },

    /// The task drew more numbers than its sub-stream holds.
    #[error("task consumed {consumed_words} words, past the end of its random stream")]
    StreamOverrun { consumed_words: u64 },
}

/// A failed task, tied to its submission index.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("task {index} failed: {cause}")]
pub struct TaskFailure {
    pub index: usize,
    pub cause: FailureCause,
}

impl TaskFailure {
    pub fn new(index: usize, cause: FailureCause) -> Self {
        Self { index, cause }
    }
}

/// Content of one result slot.
///
/// - `VALUE`: the user function returned normally.
/// - `FAILED`: user error, panic, timeout, lost worker, or stream overrun.
/// - `CANCELLED`: never started because the run was cancelled.
/// - `ABORTED`: never dispatched because the worker pool was exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome<R> {
    Value(R),
    Failed(TaskFailure),
    Cancelled,
    Aborted,
}

impl<R> Outcome<R> {
    pub fn failed(index: usize, cause: FailureCause) -> Self {
        Outcome::Failed(TaskFailure::new(index, cause))
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Value(_) => OutcomeKind::Success,
            Outcome::Failed(_) => OutcomeKind::Failure,
            Outcome::Cancelled => OutcomeKind::Cancelled,
            Outcome::Aborted => OutcomeKind::Aborted,
        }
    }

    pub fn value(&self) -> Option<&R> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<R> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            Outcome::Failed(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }
}

/// One entry of the ordered result sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSlot<R> {
    pub index: usize,
    pub outcome: Outcome<R>,

    /// Arrival position among worker reports (0-based).
    /// `None` for markers: every Cancelled or Aborted slot, whoever noticed it,
    /// and tasks failed because their worker was lost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_order: Option<u64>,

    /// Worker that reported the outcome; `None` for markers and the sequential fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerId>,
}

impl<R> ResultSlot<R> {
    pub fn value(&self) -> Option<&R> {
        self.outcome.value()
    }

    pub fn kind(&self) -> OutcomeKind {
        self.outcome.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_kind_serializes_as_required_names() {
        let s = serde_json::to_string(&OutcomeKind::Success).unwrap();
        assert_eq!(s, "\"SUCCESS\"");

        let s = serde_json::to_string(&OutcomeKind::Cancelled).unwrap();
        assert_eq!(s, "\"CANCELLED\"");
    }

    #[test]
    fn outcome_is_tagged_enum() {
        let o: Outcome<Vec<f64>> = Outcome::Value(vec![0.5]);
        let v: serde_json::Value = serde_json::to_value(&o).unwrap();
        assert_eq!(v["kind"], "VALUE");
        assert_eq!(v["value"][0], 0.5);

        let o: Outcome<u32> = Outcome::failed(3, FailureCause::TimedOut { after_ms: 50 });
        let v: serde_json::Value = serde_json::to_value(&o).unwrap();
        assert_eq!(v["kind"], "FAILED");
        assert_eq!(v["value"]["index"], 3);
        assert_eq!(v["value"]["cause"]["cause"], "timed_out");
    }

    #[test]
    fn marker_slot_omits_completion_fields() {
        let slot: ResultSlot<u32> = ResultSlot {
            index: 7,
            outcome: Outcome::Cancelled,
            completion_order: None,
            worker: None,
        };
        let v: serde_json::Value = serde_json::to_value(&slot).unwrap();
        assert!(v.get("completion_order").is_none());
        assert!(v.get("worker").is_none());

        let back: ResultSlot<u32> = serde_json::from_value(v).unwrap();
        assert_eq!(back, slot);
    }

    #[test]
    fn failure_message_names_index_and_cause() {
        let failure = TaskFailure::new(
            2,
            FailureCause::WorkerLost {
                worker: WorkerId::new(1),
                reason: "connection reset".to_string(),
            },
        );
        assert_eq!(
            failure.to_string(),
            "task 2 failed: worker-1 was lost: connection reset"
        );
    }
}
