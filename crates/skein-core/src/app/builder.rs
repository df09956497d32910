//! DispatcherBuilder - dispatcher の構築
//!
//! # 方針
//! - 設定値は build() でまとめて検証（Fail-fast）
//! - transport / clock は差し替え可能（テストでは偽物を入れる）

use std::sync::Arc;
use std::time::Duration;

use super::dispatcher::Dispatcher;
use crate::domain::{ConfigurationError, DispatchConfig, SchedulingPolicy};
use crate::impls::LocalTransport;
use crate::ports::{Clock, SystemClock};

/// DispatcherBuilder は Dispatcher を構築
///
/// # 使用例
/// ```ignore
/// let dispatcher = DispatcherBuilder::new()
///     .workers(4)
///     .policy(SchedulingPolicy::LoadBalanced)
///     .seed(42)
///     .build()?;
/// ```
pub struct DispatcherBuilder<T = LocalTransport> {
    config: DispatchConfig,
    clock: Arc<dyn Clock>,
    transport: T,
}

impl DispatcherBuilder<LocalTransport> {
    /// 新しい DispatcherBuilder を作成（LocalTransport + SystemClock）
    pub fn new() -> Self {
        Self {
            config: DispatchConfig::default(),
            clock: Arc::new(SystemClock),
            transport: LocalTransport,
        }
    }
}

impl Default for DispatcherBuilder<LocalTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DispatcherBuilder<T> {
    /// 設定をまるごと置き換える（JSON から読んだものなど）
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn policy(mut self, policy: SchedulingPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// タスク 1 件あたりの期限。ミリ秒未満は切り捨て、u64 に収まらない分は飽和
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.config.task_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn unresponsive_grace(mut self, grace: Duration) -> Self {
        self.config.unresponsive_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn reassign_lost_tasks(mut self, reassign: bool) -> Self {
        self.config.reassign_lost_tasks = reassign;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// ワーカーの起動方法を差し替える
    pub fn transport<U>(self, transport: U) -> DispatcherBuilder<U> {
        DispatcherBuilder {
            config: self.config,
            clock: self.clock,
            transport,
        }
    }

    /// 設定を検証して Dispatcher を生成
    ///
    /// # 検証
    /// - workers <= MAX_WORKERS
    /// - task_timeout が 0 でない
    pub fn build(self) -> Result<Dispatcher<T>, ConfigurationError> {
        self.config.validate()?;
        Ok(Dispatcher::from_parts(self.config, self.transport, self.clock))
    }
}
