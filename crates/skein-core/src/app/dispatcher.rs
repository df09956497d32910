//! Dispatcher - 1 回の run を最初から最後まで回す
//!
//! # フロー
//! 1. 引数ごとに index とストリームを束ねた Task を作る（TaskQueue）
//! 2. min(P, N) 個のワーカーを transport 経由で起動
//! 3. Static: 連続ブロックを一括送信 / LoadBalanced: 空いたワーカーに 1 件ずつ
//! 4. `select!` で cancel / pool 変更 / ワーカー報告 / watchdog を待つ
//! 5. 全スロットが埋まったらワーカーを閉じてレポートを返す
//!
//! キューと結果表はこのループだけが触る（ロックなし）。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::control::RunControl;
use crate::collector::ResultCollector;
use crate::domain::{
    Assignment, DispatchConfig, DispatchPhase, FailureCause, Outcome, RunCounts, RunError, RunId,
    RunReport, SchedulingPolicy, Task, Termination, WorkerHandle, WorkerId, WorkerStatus,
    WorkerSummary,
};
use crate::impls::LocalTransport;
use crate::ports::{Clock, WorkerContext, WorkerEvent, WorkerLink, WorkerTransport};
use crate::queue::TaskQueue;
use crate::rng::{StreamManager, check_stream_count};
use crate::typed::TaskFn;
use crate::worker::execute_with_deadline;

/// Runs a batch of tasks on a worker pool and collects ordered results.
///
/// Build one with `DispatcherBuilder`. A dispatcher can run any number of
/// batches; each `run` starts its own pool and tears it down afterwards.
pub struct Dispatcher<T = LocalTransport> {
    config: DispatchConfig,
    transport: T,
    clock: Arc<dyn Clock>,
}

impl<T> Dispatcher<T> {
    pub(crate) fn from_parts(config: DispatchConfig, transport: T, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            transport,
            clock,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Run `func` once per element of `args`.
    ///
    /// `results[i]` of the report always belongs to `args[i]`, whatever the
    /// worker count or policy.
    pub async fn run<P, R, F>(&self, func: F, args: Vec<P>) -> Result<RunReport<R>, RunError<R>>
    where
        F: TaskFn<P, R> + 'static,
        P: Send + Sync + 'static,
        R: Send + 'static,
        T: WorkerTransport<P, R>,
    {
        self.run_with_control(func, args, &RunControl::new()).await
    }

    /// Same as `run`, observing `control` for cancellation and pool resizes.
    pub async fn run_with_control<P, R, F>(
        &self,
        func: F,
        args: Vec<P>,
        control: &RunControl,
    ) -> Result<RunReport<R>, RunError<R>>
    where
        F: TaskFn<P, R> + 'static,
        P: Send + Sync + 'static,
        R: Send + 'static,
        T: WorkerTransport<P, R>,
    {
        let n = args.len();
        check_stream_count(n)?;

        let started_at = self.clock.now();
        let t0 = Instant::now();
        let run_id = RunId::generate(self.clock.as_ref());

        let streams = StreamManager::new(self.config.seed);
        let queue = TaskQueue::build(args, &streams)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (worker_cancel, _) = control.subscribe();

        info!(
            %run_id,
            tasks = n,
            workers = self.config.workers,
            policy = %self.config.policy,
            seed = self.config.seed,
            "run started"
        );

        let mut run = Run {
            run_id,
            config: &self.config,
            transport: &self.transport,
            func: Arc::new(func),
            streams,
            queue,
            collector: ResultCollector::new(n),
            workers: BTreeMap::new(),
            next_worker: 0,
            spawned: 0,
            phase: DispatchPhase::Idle,
            events: events_tx,
            worker_cancel,
            cancelled: false,
            exhausted: false,
        };

        if n == 0 {
            // 何も起動せずに終わる
        } else if self.config.workers == 0 {
            run.run_sequential(control).await;
        } else {
            run.run_pool(control, events_rx).await;
        }

        run.finish(started_at, self.clock.now(), t0.elapsed())
    }
}

struct WorkerSlot<P> {
    handle: WorkerHandle,
    link: Option<Box<dyn WorkerLink<P>>>,

    /// Tasks sent but not reported yet; payloads kept for reassignment.
    in_flight: Vec<(usize, Arc<P>)>,

    sent_at: Option<Instant>,
    deadline_at: Option<Instant>,
}

/// State of one run. Lives on the dispatcher task only.
struct Run<'a, P, R, T> {
    run_id: RunId,
    config: &'a DispatchConfig,
    transport: &'a T,
    func: Arc<dyn TaskFn<P, R>>,
    streams: StreamManager,
    queue: TaskQueue<P>,
    collector: ResultCollector<R>,
    workers: BTreeMap<WorkerId, WorkerSlot<P>>,
    next_worker: usize,
    spawned: usize,
    phase: DispatchPhase,
    events: mpsc::UnboundedSender<WorkerEvent<R>>,
    worker_cancel: watch::Receiver<bool>,
    cancelled: bool,
    exhausted: bool,
}

impl<P, R, T> Run<'_, P, R, T>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
    T: WorkerTransport<P, R>,
{
    fn transition(&mut self, next: DispatchPhase) {
        if self.phase == next {
            return;
        }
        if !self.phase.can_transition_to(next) {
            error!(run_id = %self.run_id, from = ?self.phase, to = ?next, "invalid dispatcher phase transition");
            return;
        }
        info!(run_id = %self.run_id, from = ?self.phase, to = ?next, "dispatcher phase changed");
        self.phase = next;
    }

    /// P = 0: every task in index order on the blocking pool, no workers.
    async fn run_sequential(&mut self, control: &RunControl) {
        self.transition(DispatchPhase::Initializing);
        self.transition(DispatchPhase::Dispatching);

        let timeout = self.config.task_timeout();
        loop {
            if control.is_cancelled() {
                self.cancel();
                break;
            }
            let Some(task) = self.queue.pop_next() else {
                break;
            };
            let index = task.index();
            let outcome = execute_with_deadline(Arc::clone(&self.func), task, timeout).await;
            self.record(index, outcome, None);
        }

        self.transition(DispatchPhase::Draining);
    }

    async fn run_pool(
        &mut self,
        control: &RunControl,
        mut events_rx: mpsc::UnboundedReceiver<WorkerEvent<R>>,
    ) {
        self.transition(DispatchPhase::Initializing);

        let initial = self.config.workers.min(self.queue.len());
        for _ in 0..initial {
            self.spawn_worker().await;
        }
        if self.healthy_count() == 0 {
            warn!(run_id = %self.run_id, requested = initial, "no worker could be spawned");
            self.abort_pending();
            return;
        }
        self.transition(DispatchPhase::Dispatching);

        let (mut cancel_rx, mut pool_rx) = control.subscribe();
        let mut pool_open = true;

        // run 開始前に来ていた操作も反映する
        if *cancel_rx.borrow_and_update() {
            self.cancel();
        }
        let requested = *pool_rx.borrow_and_update();
        if let Some(target) = requested {
            self.resize(target).await;
        }

        if !self.cancelled && self.config.policy == SchedulingPolicy::Static {
            self.assign_static_blocks().await;
        }

        loop {
            if !self.cancelled {
                self.fill_idle().await;
            }
            if !self.queue.is_empty() && self.healthy_count() == 0 {
                self.abort_pending();
            }
            if self.collector.is_complete() {
                break;
            }
            if self.in_flight_count() == 0 {
                error!(
                    run_id = %self.run_id,
                    missing = ?self.collector.missing(),
                    "nothing in flight but results are missing"
                );
                break;
            }
            if self.queue.is_empty() {
                self.transition(DispatchPhase::Draining);
            }

            let watchdog = self.next_watchdog();
            tokio::select! {
                biased;

                changed = cancel_rx.changed(), if !self.cancelled => {
                    if changed.is_ok() && *cancel_rx.borrow_and_update() {
                        self.cancel();
                    }
                }
                changed = pool_rx.changed(), if pool_open => {
                    match changed {
                        Ok(()) => {
                            let requested = *pool_rx.borrow_and_update();
                            if let Some(target) = requested {
                                self.resize(target).await;
                            }
                        }
                        Err(_) => pool_open = false,
                    }
                }
                Some(event) = events_rx.recv() => {
                    self.handle_event(event).await;
                }
                _ = tokio::time::sleep_until(watchdog.unwrap_or_else(Instant::now)), if watchdog.is_some() => {
                    self.expire_unresponsive().await;
                }
                else => {
                    error!(run_id = %self.run_id, "dispatcher has nothing left to wait on");
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    async fn spawn_worker(&mut self) -> WorkerId {
        let id = WorkerId::new(self.next_worker);
        self.next_worker += 1;

        let ctx = WorkerContext {
            events: self.events.clone(),
            cancel: self.worker_cancel.clone(),
        };
        let mut handle = WorkerHandle::new(id);
        let link = match self.transport.spawn(id, Arc::clone(&self.func), ctx).await {
            Ok(link) => {
                self.spawned += 1;
                debug!(run_id = %self.run_id, worker = %id, "worker spawned");
                Some(link)
            }
            Err(err) => {
                warn!(run_id = %self.run_id, worker = %id, error = %err, "worker spawn failed");
                handle.mark_failed();
                None
            }
        };

        self.workers.insert(
            id,
            WorkerSlot {
                handle,
                link,
                in_flight: Vec::new(),
                sent_at: None,
                deadline_at: None,
            },
        );
        id
    }

    fn healthy_count(&self) -> usize {
        self.workers.values().filter(|s| s.handle.is_healthy()).count()
    }

    fn in_flight_count(&self) -> usize {
        self.workers.values().map(|s| s.in_flight.len()).sum()
    }

    fn available_workers(&self) -> Vec<WorkerId> {
        self.workers
            .values()
            .filter(|s| s.handle.is_available() && s.link.is_some())
            .map(|s| s.handle.id())
            .collect()
    }

    async fn assign_static_blocks(&mut self) {
        let ids = self.available_workers();
        let blocks = self.queue.partition(ids.len());
        for (id, block) in ids.into_iter().zip(blocks) {
            self.assign(id, block).await;
        }
    }

    /// Greedy: lowest pending index to the lowest idle worker id, one task each.
    async fn fill_idle(&mut self) {
        while !self.queue.is_empty() {
            let Some(id) = self.available_workers().first().copied() else {
                break;
            };
            let Some(task) = self.queue.pop_next() else {
                break;
            };
            self.assign(id, vec![task]).await;
        }
    }

    async fn assign(&mut self, id: WorkerId, tasks: Vec<Task<P>>) {
        if tasks.is_empty() {
            return;
        }
        let timeout = self.config.task_timeout();
        let grace = self.config.unresponsive_grace();

        let Some(slot) = self.workers.get_mut(&id) else {
            for task in tasks {
                self.queue.requeue(task);
            }
            return;
        };
        let Some(link) = slot.link.as_mut() else {
            for task in tasks {
                self.queue.requeue(task);
            }
            return;
        };

        let now = Instant::now();
        let count = u32::try_from(tasks.len()).unwrap_or(u32::MAX);
        slot.in_flight = tasks.iter().map(|t| (t.index(), t.shared_payload())).collect();
        slot.sent_at = Some(now);
        // 期限が Instant の範囲を超えるなら watchdog は付けない
        slot.deadline_at = timeout
            .and_then(|d| d.checked_mul(count))
            .and_then(|d| d.checked_add(grace))
            .and_then(|d| now.checked_add(d));
        slot.handle.mark_busy();

        let assignment = Assignment::new(tasks, timeout);
        debug!(run_id = %self.run_id, worker = %id, tasks = ?assignment.indices(), "assignment sent");

        let sent = link.send(assignment).await;
        if let Err(err) = sent {
            self.fail_worker(id, err.to_string()).await;
        }
    }

    async fn handle_event(&mut self, event: WorkerEvent<R>) {
        if !self.workers.contains_key(&event.worker()) {
            warn!(run_id = %self.run_id, worker = %event.worker(), "event from unknown worker");
            return;
        }
        match event {
            WorkerEvent::Completed { worker, results } => self.complete(worker, results).await,
            WorkerEvent::Lost { worker, reason } => self.fail_worker(worker, reason).await,
        }
    }

    async fn complete(&mut self, id: WorkerId, results: Vec<(usize, Outcome<R>)>) {
        let Some(slot) = self.workers.get_mut(&id) else {
            return;
        };
        if slot.handle.status() == WorkerStatus::Failed {
            debug!(run_id = %self.run_id, worker = %id, "late report from failed worker discarded");
            return;
        }

        let mut ran = 0;
        for (index, outcome) in results {
            let Some(pos) = slot.in_flight.iter().position(|(i, _)| *i == index) else {
                debug!(run_id = %self.run_id, worker = %id, index, "late report discarded");
                continue;
            };
            slot.in_flight.swap_remove(pos);

            // 開始されなかったタスクは dispatcher 側の cancel と同じ扱い（順序もワーカーも付けない）
            if matches!(outcome, Outcome::Cancelled) {
                if let Err(err) = self.collector.mark(index, outcome) {
                    error!(run_id = %self.run_id, worker = %id, error = %err, "marker dropped");
                }
                continue;
            }
            ran += 1;
            if let Outcome::Failed(failure) = &outcome {
                warn!(run_id = %self.run_id, worker = %id, %failure, "task failed");
            }
            if let Err(err) = self.collector.record(index, outcome, Some(id)) {
                error!(run_id = %self.run_id, worker = %id, error = %err, "result dropped");
            }
        }
        slot.handle.record_completed(ran);

        if slot.in_flight.is_empty() {
            slot.sent_at = None;
            slot.deadline_at = None;
            slot.handle.mark_idle();
            if slot.handle.is_cordoned() {
                if let Some(link) = slot.link.take() {
                    link.close().await;
                }
                slot.handle.mark_terminated();
                debug!(run_id = %self.run_id, worker = %id, "cordoned worker drained");
            }
        }
    }

    /// Take a worker out for good. Its in-flight tasks fail, or go back to
    /// the queue with a fresh stream when reassignment is on.
    async fn fail_worker(&mut self, id: WorkerId, reason: String) {
        let Some(slot) = self.workers.get_mut(&id) else {
            return;
        };
        if slot.handle.status() == WorkerStatus::Failed {
            return;
        }
        slot.handle.mark_failed();
        slot.sent_at = None;
        slot.deadline_at = None;
        let link = slot.link.take();
        let in_flight = std::mem::take(&mut slot.in_flight);
        warn!(run_id = %self.run_id, worker = %id, %reason, in_flight = in_flight.len(), "worker failed");

        if let Some(link) = link {
            link.close().await;
        }

        let mut requeued = 0;
        for (index, payload) in in_flight {
            if self.config.reassign_lost_tasks && !self.cancelled {
                // 同じ index から導出し直すので、どのワーカーで再実行しても値は変わらない
                match self.streams.stream(index) {
                    Ok(stream) => {
                        self.queue.requeue(Task::new(index, payload, stream));
                        requeued += 1;
                        continue;
                    }
                    Err(err) => error!(run_id = %self.run_id, index, error = %err, "cannot rebuild stream"),
                }
            }
            let lost = Outcome::failed(
                index,
                FailureCause::WorkerLost {
                    worker: id,
                    reason: reason.clone(),
                },
            );
            self.mark(index, lost);
        }

        if requeued > 0 {
            debug!(run_id = %self.run_id, worker = %id, requeued, "lost tasks re-queued");
            if self.phase == DispatchPhase::Draining {
                self.transition(DispatchPhase::Dispatching);
            }
        }
    }

    fn next_watchdog(&self) -> Option<Instant> {
        self.workers
            .values()
            .filter(|s| !s.in_flight.is_empty())
            .filter_map(|s| s.deadline_at)
            .min()
    }

    async fn expire_unresponsive(&mut self) {
        let now = Instant::now();
        let overdue: Vec<(WorkerId, Duration)> = self
            .workers
            .values()
            .filter(|s| !s.in_flight.is_empty())
            .filter(|s| s.deadline_at.is_some_and(|d| d <= now))
            .map(|s| (s.handle.id(), s.sent_at.map(|t| now - t).unwrap_or_default()))
            .collect();

        for (id, waited) in overdue {
            let reason = format!("no report after {}ms", waited.as_millis());
            self.fail_worker(id, reason).await;
        }
    }

    async fn resize(&mut self, target: usize) {
        let healthy: Vec<&WorkerSlot<P>> =
            self.workers.values().filter(|s| s.handle.is_healthy()).collect();
        let current = healthy.len();
        if target == current {
            return;
        }
        info!(run_id = %self.run_id, from = current, to = target, "resizing worker pool");

        if target > current {
            if self.cancelled {
                debug!(run_id = %self.run_id, "run cancelled; pool not grown");
                return;
            }
            // 新しいワーカーは次のループ先頭の fill_idle で仕事をもらう
            for _ in current..target {
                self.spawn_worker().await;
            }
            return;
        }

        // idle を先に、次に busy の大きい id から cordon する
        let mut idle: Vec<WorkerId> = healthy
            .iter()
            .filter(|s| s.in_flight.is_empty())
            .map(|s| s.handle.id())
            .collect();
        let mut busy: Vec<WorkerId> = healthy
            .iter()
            .filter(|s| !s.in_flight.is_empty())
            .map(|s| s.handle.id())
            .collect();
        idle.reverse();
        busy.reverse();

        let victims: Vec<WorkerId> = idle.into_iter().chain(busy).take(current - target).collect();
        for id in victims {
            self.cordon(id).await;
        }
    }

    async fn cordon(&mut self, id: WorkerId) {
        let Some(slot) = self.workers.get_mut(&id) else {
            return;
        };
        slot.handle.cordon();
        if slot.in_flight.is_empty() {
            if let Some(link) = slot.link.take() {
                link.close().await;
            }
            slot.handle.mark_terminated();
            debug!(run_id = %self.run_id, worker = %id, "idle worker removed");
        } else {
            debug!(run_id = %self.run_id, worker = %id, "busy worker cordoned");
        }
    }

    fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        let pending = self.queue.drain_indices();
        info!(run_id = %self.run_id, pending = pending.len(), "run cancelled");
        for index in pending {
            self.mark(index, Outcome::Cancelled);
        }
    }

    fn abort_pending(&mut self) {
        let pending = self.queue.drain_indices();
        if pending.is_empty() {
            return;
        }
        warn!(run_id = %self.run_id, aborted = pending.len(), "worker pool exhausted");
        self.exhausted = true;
        for index in pending {
            self.mark(index, Outcome::Aborted);
        }
    }

    fn record(&mut self, index: usize, outcome: Outcome<R>, worker: Option<WorkerId>) {
        if let Outcome::Failed(failure) = &outcome {
            warn!(run_id = %self.run_id, %failure, "task failed");
        }
        if let Err(err) = self.collector.record(index, outcome, worker) {
            error!(run_id = %self.run_id, error = %err, "result dropped");
        }
    }

    fn mark(&mut self, index: usize, outcome: Outcome<R>) {
        if let Err(err) = self.collector.mark(index, outcome) {
            error!(run_id = %self.run_id, error = %err, "marker dropped");
        }
    }

    async fn shutdown(&mut self) {
        for slot in self.workers.values_mut() {
            if let Some(link) = slot.link.take() {
                link.close().await;
            }
            slot.handle.mark_terminated();
        }
    }

    fn finish(
        mut self,
        started_at: chrono::DateTime<chrono::Utc>,
        finished_at: chrono::DateTime<chrono::Utc>,
        makespan: Duration,
    ) -> Result<RunReport<R>, RunError<R>> {
        if self.phase == DispatchPhase::Dispatching {
            self.transition(DispatchPhase::Draining);
        }
        self.transition(DispatchPhase::Terminated);

        if !self.collector.is_complete() {
            error!(
                run_id = %self.run_id,
                filled = self.collector.filled(),
                missing = ?self.collector.missing(),
                "sealing incomplete results"
            );
        }
        let results = self.collector.seal(|_| Outcome::Aborted);
        let counts = RunCounts::from_slots(&results);
        let workers = self
            .workers
            .values()
            .map(|s| WorkerSummary {
                id: s.handle.id(),
                status: s.handle.status(),
                tasks_completed: s.handle.tasks_completed(),
            })
            .collect();

        info!(
            run_id = %self.run_id,
            succeeded = counts.succeeded,
            failed = counts.failed,
            cancelled = counts.cancelled,
            aborted = counts.aborted,
            makespan_ms = makespan.as_millis() as u64,
            "run finished"
        );

        if self.exhausted {
            return Err(RunError::PoolExhausted {
                aborted: counts.aborted,
                total: results.len(),
                results,
            });
        }

        Ok(RunReport {
            run_id: self.run_id,
            policy: self.config.policy,
            seed: self.config.seed,
            requested_workers: self.config.workers,
            workers_spawned: self.spawned,
            results,
            termination: if self.cancelled {
                Termination::Cancelled
            } else {
                Termination::Completed
            },
            counts,
            workers,
            started_at,
            finished_at,
            makespan,
        })
    }
}
