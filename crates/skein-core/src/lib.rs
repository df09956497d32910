//! skein-core
//!
//! Reproducible task dispatch: N tasks over P workers, one random stream per
//! task index, results back in submission order.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, outcome, policy, state, config, report, errors）
//! - **rng**: index ごとの乱数ストリーム（ChaCha20 の jump-ahead）
//! - **queue**: 未割り当てタスクのバックログ
//! - **collector**: 結果を submission 順に並べ直す
//! - **worker**: タスク 1 件の実行ハーネス（panic / 期限 / ストリーム超過）
//! - **typed**: ユーザー関数 API（`TaskFn`）
//! - **ports**: 抽象化レイヤー（WorkerTransport, Clock）
//! - **impls**: 実装（LocalTransport）
//! - **app**: dispatcher, builder, run control

pub mod app;
pub mod collector;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod rng;
pub mod typed;
pub mod worker;

use std::fmt::Display;

pub use app::{Dispatcher, DispatcherBuilder, RunControl};
pub use domain::{
    ConfigurationError, DispatchConfig, FailureCause, Outcome, OutcomeKind, ResultSlot, RunError,
    RunReport, SchedulingPolicy, TaskFailure, Termination, WorkerId,
};
pub use rng::{StreamManager, StreamState, derive_streams};
pub use typed::{TaskError, TaskFn, task_fn};

/// One-shot submission on the in-process transport.
///
/// # Example
/// ```ignore
/// let report = skein_core::submit(
///     |x: &f64, s: &mut StreamState| -> Result<f64, TaskError> { Ok(x * s.next_standard_normal()) },
///     vec![1.0, 2.0, 3.0],
///     42,
///     SchedulingPolicy::LoadBalanced,
///     4,
/// )
/// .await?;
/// ```
pub async fn submit<P, R, E, F>(
    func: F,
    args: Vec<P>,
    seed: u64,
    policy: SchedulingPolicy,
    worker_count: usize,
) -> Result<RunReport<R>, RunError<R>>
where
    F: Fn(&P, &mut StreamState) -> Result<R, E> + Send + Sync + 'static,
    E: Display + 'static,
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    let dispatcher = DispatcherBuilder::new()
        .workers(worker_count)
        .policy(policy)
        .seed(seed)
        .build()?;
    dispatcher.run(task_fn(func), args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn two_normals(_: &u32, s: &mut StreamState) -> Result<(f64, f64), TaskError> {
        Ok((s.next_standard_normal(), s.next_standard_normal()))
    }

    #[rstest]
    #[case(SchedulingPolicy::Static, 2)]
    #[case(SchedulingPolicy::Static, 5)]
    #[case(SchedulingPolicy::LoadBalanced, 3)]
    #[case(SchedulingPolicy::Static, 0)]
    #[tokio::test]
    async fn submit_is_reproducible(#[case] policy: SchedulingPolicy, #[case] workers: usize) {
        let report = submit(two_normals, (0..5).collect(), 1, policy, workers)
            .await
            .unwrap();

        let expected: Vec<(f64, f64)> = derive_streams(1, 5)
            .unwrap()
            .into_iter()
            .map(|mut s| (s.next_standard_normal(), s.next_standard_normal()))
            .collect();
        let got: Vec<(f64, f64)> = report.into_values().into_iter().flatten().collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn submit_rejects_oversized_pool() {
        let err = submit(two_normals, vec![0], 1, SchedulingPolicy::Static, domain::MAX_WORKERS + 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::Configuration(ConfigurationError::TooManyWorkers { .. })
        ));
    }

    #[tokio::test]
    async fn submit_keeps_length_with_failures() {
        let report = submit(
            |i: &usize, _: &mut StreamState| -> Result<usize, String> {
                if i % 2 == 0 { Ok(*i) } else { Err("odd".to_string()) }
            },
            (0..7).collect(),
            9,
            SchedulingPolicy::LoadBalanced,
            3,
        )
        .await
        .unwrap();

        assert_eq!(report.results.len(), 7);
        assert_eq!(report.counts.succeeded, 4);
        assert_eq!(report.counts.failed, 3);
        assert!(!report.is_fully_successful());
    }
}
