//! Task harness: runs one task and turns whatever happens into an `Outcome`.
//!
//! ここで panic / Err / 期限切れ / ストリーム超過をすべて吸収するので、
//! 呼び出し側（ワーカーや dispatcher）が巻き込まれて落ちることはない。

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;

use crate::domain::{FailureCause, Outcome, Task};
use crate::typed::TaskFn;

/// Run `task` on the current thread.
///
/// The function only ever sees the task's payload and stream.
pub fn execute<P, R>(func: &dyn TaskFn<P, R>, task: Task<P>) -> Outcome<R> {
    let (index, payload, mut stream) = task.into_parts();

    let result = catch_unwind(AssertUnwindSafe(|| func.call(&payload, &mut stream)));

    match result {
        // overrun した値は隣の index のストリームと重なっているので捨てる
        Ok(Ok(_)) if stream.is_overrun() => {
            let consumed_words = stream.words_consumed();
            tracing::warn!(index, consumed_words, "task overran its random stream");
            Outcome::failed(index, FailureCause::StreamOverrun { consumed_words })
        }
        Ok(Ok(value)) => Outcome::Value(value),
        Ok(Err(err)) => Outcome::failed(
            index,
            FailureCause::Error {
                message: err.into_message(),
            },
        ),
        Err(panic) => Outcome::failed(
            index,
            FailureCause::Panicked {
                message: panic_message(panic.as_ref()),
            },
        ),
    }
}

/// Run `task` on tokio's blocking pool, giving up after `deadline`.
///
/// A timed-out computation is detached, not killed: it keeps its blocking
/// thread until it returns, and its result is dropped. It can outlive the
/// run, and dropping the tokio runtime waits for it; callers that must exit
/// promptly shut the runtime down with `shutdown_background` or
/// `shutdown_timeout`.
pub async fn execute_with_deadline<P, R>(
    func: Arc<dyn TaskFn<P, R>>,
    task: Task<P>,
    deadline: Option<Duration>,
) -> Outcome<R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    let index = task.index();
    let handle = tokio::task::spawn_blocking(move || execute(func.as_ref(), task));

    let joined = match deadline {
        None => handle.await,
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                return Outcome::failed(
                    index,
                    FailureCause::TimedOut {
                        after_ms: limit.as_millis().try_into().unwrap_or(u64::MAX),
                    },
                );
            }
        },
    };

    joined.unwrap_or_else(|err| join_failure(index, err))
}

fn join_failure<R>(index: usize, err: JoinError) -> Outcome<R> {
    if err.is_panic() {
        Outcome::failed(
            index,
            FailureCause::Panicked {
                message: panic_message(err.into_panic().as_ref()),
            },
        )
    } else {
        Outcome::failed(
            index,
            FailureCause::Error {
                message: format!("task was cancelled by the runtime: {err}"),
            },
        )
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
