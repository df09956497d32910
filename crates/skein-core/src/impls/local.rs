//! LocalTransport - 同一プロセス内のワーカー
//!
//! # 実装詳細
//! - ワーカー 1 つにつき tokio task 1 つ + mpsc の受信箱
//! - タスク本体は `execute_with_deadline` で blocking pool 上に逃がす
//! - 1 つのワーカー内のタスクは順番に 1 つずつ実行
//! - タスク開始前に cancel を確認し、以降は実行せず Cancelled を返す

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::{Assignment, Outcome, TransportError, WorkerId};
use crate::ports::{WorkerContext, WorkerEvent, WorkerLink, WorkerTransport};
use crate::typed::TaskFn;
use crate::worker::execute_with_deadline;

/// In-process transport: every worker is a tokio task.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

#[async_trait]
impl<P, R> WorkerTransport<P, R> for LocalTransport
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn spawn(
        &self,
        id: WorkerId,
        func: Arc<dyn TaskFn<P, R>>,
        ctx: WorkerContext<R>,
    ) -> Result<Box<dyn WorkerLink<P>>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(worker_loop(id, func, rx, ctx));
        Ok(Box::new(LocalLink { id, tx, join }))
    }
}

struct LocalLink<P> {
    id: WorkerId,
    tx: mpsc::UnboundedSender<Assignment<P>>,
    join: JoinHandle<()>,
}

#[async_trait]
impl<P> WorkerLink<P> for LocalLink<P>
where
    P: Send + Sync + 'static,
{
    fn id(&self) -> WorkerId {
        self.id
    }

    async fn send(&mut self, assignment: Assignment<P>) -> Result<(), TransportError> {
        self.tx
            .send(assignment)
            .map_err(|_| TransportError::Unreachable(self.id, "worker inbox closed".to_string()))
    }

    async fn close(self: Box<Self>) {
        // 受信箱を閉じるとワーカーは手持ちを終えてから抜ける。join は待たない
        // (期限切れで切り離した計算がまだ走っている可能性がある)
        let LocalLink { id, tx, join } = *self;
        drop(tx);
        drop(join);
        tracing::debug!(worker = %id, "worker closed");
    }
}

async fn worker_loop<P, R>(
    id: WorkerId,
    func: Arc<dyn TaskFn<P, R>>,
    mut inbox: mpsc::UnboundedReceiver<Assignment<P>>,
    ctx: WorkerContext<R>,
) where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    while let Some(Assignment { tasks, deadline }) = inbox.recv().await {
        tracing::debug!(worker = %id, tasks = tasks.len(), "assignment received");

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let index = task.index();
            // cancel 後は開始しない（実行中のものは止めない）
            if *ctx.cancel.borrow() {
                results.push((index, Outcome::Cancelled));
                continue;
            }
            let outcome = execute_with_deadline(Arc::clone(&func), task, deadline).await;
            results.push((index, outcome));
        }

        let event = WorkerEvent::Completed {
            worker: id,
            results,
        };
        if ctx.events.send(event).is_err() {
            // dispatcher が先にいなくなった
            break;
        }
    }
    tracing::debug!(worker = %id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailureCause, Task};
    use crate::rng::{StreamManager, StreamState};
    use crate::typed::{TaskError, task_fn};
    use rand::RngCore;
    use std::time::Duration;
    use tokio::sync::watch;

    fn assignment(indices: &[usize], deadline: Option<Duration>) -> Assignment<u64> {
        let manager = StreamManager::new(1);
        let tasks = indices
            .iter()
            .map(|&i| Task::new(i, Arc::new(i as u64), manager.stream(i).unwrap()))
            .collect();
        Assignment::new(tasks, deadline)
    }

    fn draw() -> Arc<dyn TaskFn<u64, u64>> {
        Arc::new(task_fn(|x: &u64, s: &mut StreamState| -> Result<u64, TaskError> {
            Ok(x + (s.next_u32() as u64))
        }))
    }

    #[tokio::test]
    async fn reports_one_event_per_assignment_in_order() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut link = WorkerTransport::<u64, u64>::spawn(
            &LocalTransport,
            WorkerId::new(0),
            draw(),
            WorkerContext {
                events: events_tx,
                cancel: cancel_rx,
            },
        )
        .await
        .unwrap();

        link.send(assignment(&[4, 5, 6], None)).await.unwrap();

        let event = events_rx.recv().await.unwrap();
        let WorkerEvent::Completed { worker, results } = event else {
            panic!("expected completion");
        };
        assert_eq!(worker, WorkerId::new(0));
        let indices: Vec<usize> = results.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![4, 5, 6]);
        assert!(results.iter().all(|(_, o)| o.is_value()));

        link.close().await;
    }

    #[tokio::test]
    async fn cancelled_worker_does_not_start_tasks() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut link = WorkerTransport::<u64, u64>::spawn(
            &LocalTransport,
            WorkerId::new(1),
            draw(),
            WorkerContext {
                events: events_tx,
                cancel: cancel_rx,
            },
        )
        .await
        .unwrap();

        cancel_tx.send_replace(true);
        link.send(assignment(&[0, 1], None)).await.unwrap();

        let Some(WorkerEvent::Completed { results, .. }) = events_rx.recv().await else {
            panic!("expected completion");
        };
        assert!(results.iter().all(|(_, o)| *o == Outcome::Cancelled));
    }

    #[tokio::test]
    async fn timed_out_task_frees_the_worker() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let slow: Arc<dyn TaskFn<u64, u64>> = Arc::new(task_fn(
            |x: &u64, _: &mut StreamState| -> Result<u64, TaskError> {
                if *x == 0 {
                    std::thread::sleep(Duration::from_millis(400));
                }
                Ok(*x)
            },
        ));
        let mut link = WorkerTransport::<u64, u64>::spawn(
            &LocalTransport,
            WorkerId::new(2),
            slow,
            WorkerContext {
                events: events_tx,
                cancel: cancel_rx,
            },
        )
        .await
        .unwrap();

        link.send(assignment(&[0, 1], Some(Duration::from_millis(30))))
            .await
            .unwrap();

        let Some(WorkerEvent::Completed { results, .. }) = events_rx.recv().await else {
            panic!("expected completion");
        };
        assert_eq!(
            results[0].1,
            Outcome::failed(0, FailureCause::TimedOut { after_ms: 30 })
        );
        assert_eq!(results[1].1, Outcome::Value(1));
    }

    #[tokio::test]
    async fn link_reports_its_worker_id() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let link = WorkerTransport::<u64, u64>::spawn(
            &LocalTransport,
            WorkerId::new(3),
            draw(),
            WorkerContext {
                events: events_tx,
                cancel: cancel_rx,
            },
        )
        .await
        .unwrap();
        assert_eq!(link.id(), WorkerId::new(3));
        link.close().await;
    }
}
