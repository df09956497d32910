//! WorkerTransport port - dispatcher とワーカーの間の通信路
//!
//! # 設計原則
//! - dispatcher → worker: `WorkerLink::send(Assignment)`
//! - worker → dispatcher: 共有の `events` チャネルに `WorkerEvent` を送る
//! - 1 タスクの結果は高々 1 回だけ報告する（at-most-once）
//!
//! 同一プロセス内の実装は `impls::local::LocalTransport`。
//! ソケットや MPI の実装も同じ trait を満たせば差し替え可能。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::domain::{Assignment, Outcome, TransportError, WorkerId};
use crate::typed::TaskFn;

/// Message from a worker to the dispatcher.
#[derive(Debug)]
pub enum WorkerEvent<R> {
    /// All tasks of one assignment are done, in assignment order.
    Completed {
        worker: WorkerId,
        results: Vec<(usize, Outcome<R>)>,
    },

    /// The worker can no longer run anything (crashed, disconnected, ...).
    Lost { worker: WorkerId, reason: String },
}

impl<R> WorkerEvent<R> {
    pub fn worker(&self) -> WorkerId {
        match self {
            WorkerEvent::Completed { worker, .. } | WorkerEvent::Lost { worker, .. } => *worker,
        }
    }
}

/// What a freshly spawned worker is given besides the function.
#[derive(Debug)]
pub struct WorkerContext<R> {
    pub events: mpsc::UnboundedSender<WorkerEvent<R>>,

    /// Flips to `true` when the run is cancelled; checked before each task.
    pub cancel: watch::Receiver<bool>,
}

/// Starts workers.
#[async_trait]
pub trait WorkerTransport<P, R>: Send + Sync
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn spawn(
        &self,
        id: WorkerId,
        func: Arc<dyn TaskFn<P, R>>,
        ctx: WorkerContext<R>,
    ) -> Result<Box<dyn WorkerLink<P>>, TransportError>;
}

/// Dispatcher-side handle to one worker.
#[async_trait]
pub trait WorkerLink<P>: Send
where
    P: Send + Sync + 'static,
{
    fn id(&self) -> WorkerId;

    /// Hand over an assignment. Failure means the worker is unreachable.
    async fn send(&mut self, assignment: Assignment<P>) -> Result<(), TransportError>;

    /// Stop the worker once it finishes what it holds.
    async fn close(self: Box<Self>);
}
