use std::sync::Arc;
use std::time::Duration;

use crate::rng::StreamState;

/// One unit of user computation with a fixed position in the submission order.
///
/// Design:
/// - Created by the dispatcher at submission time, immutable afterwards.
/// - The stream is bound to `index`, not to whichever worker runs the task.
/// - Consumed exactly once: the worker takes ownership via `into_parts`.
#[derive(Debug)]
pub struct Task<P> {
    index: usize,
    payload: Arc<P>,
    stream: StreamState,
}

impl<P> Task<P> {
    /// Only the queue and the dispatcher pair an index with its stream.
    pub(crate) fn new(index: usize, payload: Arc<P>, stream: StreamState) -> Self {
        debug_assert_eq!(index, stream.index(), "stream must be derived for the task's own index");
        Self {
            index,
            payload,
            stream,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn stream(&self) -> &StreamState {
        &self.stream
    }

    /// Payload handle kept by the dispatcher so a lost task can be rebuilt.
    pub(crate) fn shared_payload(&self) -> Arc<P> {
        Arc::clone(&self.payload)
    }

    /// Hand the task over to its executor.
    pub fn into_parts(self) -> (usize, Arc<P>, StreamState) {
        (self.index, self.payload, self.stream)
    }
}

/// What a worker receives in one message.
///
/// LoadBalanced: exactly one task. Static: the worker's whole contiguous block.
#[derive(Debug)]
pub struct Assignment<P> {
    pub tasks: Vec<Task<P>>,

    /// Per-task deadline (not per assignment).
    pub deadline: Option<Duration>,
}

impl<P> Assignment<P> {
    pub fn new(tasks: Vec<Task<P>>, deadline: Option<Duration>) -> Self {
        Self { tasks, deadline }
    }

    pub fn indices(&self) -> Vec<usize> {
        self.tasks.iter().map(Task::index).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
