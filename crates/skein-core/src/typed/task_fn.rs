//! TaskFn trait - ユーザー関数の抽象化
//!
//! # 二層構造
//! - **表層**: `Fn(&P, &mut StreamState) -> Result<R, E>` (E は Display なら何でもよい)
//! - **内部**: `dyn TaskFn<P, R>` - object-safe。エラーは `TaskError` に正規化済み

use std::fmt;
use std::marker::PhantomData;

use thiserror::Error;

use crate::rng::StreamState;

/// Error reported by a task function; only its message survives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TaskError(String);

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }

    pub fn into_message(self) -> String {
        self.0
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// A user computation: payload plus the task's own stream in, value out.
///
/// The function sees nothing else (no worker id, no other task), which is
/// what makes the result a pure function of `(seed, index, payload)`.
pub trait TaskFn<P, R>: Send + Sync {
    fn call(&self, payload: &P, stream: &mut StreamState) -> Result<R, TaskError>;
}

/// Adapter from a closure with any `Display` error type to `TaskFn`.
///
/// `E` は関数の戻り値にしか現れないので PhantomData で固定する。
pub struct FnTask<F, E> {
    func: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> FnTask<F, E> {
    pub fn new(func: F) -> Self {
        Self {
            func,
            _error: PhantomData,
        }
    }
}

impl<F, E> fmt::Debug for FnTask<F, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").finish_non_exhaustive()
    }
}

impl<P, R, F, E> TaskFn<P, R> for FnTask<F, E>
where
    F: Fn(&P, &mut StreamState) -> Result<R, E> + Send + Sync,
    E: fmt::Display,
{
    fn call(&self, payload: &P, stream: &mut StreamState) -> Result<R, TaskError> {
        (self.func)(payload, stream).map_err(|e| TaskError::new(e.to_string()))
    }
}

/// Shorthand for `FnTask::new`.
pub fn task_fn<P, R, F, E>(func: F) -> FnTask<F, E>
where
    F: Fn(&P, &mut StreamState) -> Result<R, E> + Send + Sync,
    E: fmt::Display,
{
    FnTask::new(func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::StreamManager;
    use rand::Rng;

    struct UniformSum;

    impl TaskFn<usize, f64> for UniformSum {
        fn call(&self, n: &usize, stream: &mut StreamState) -> Result<f64, TaskError> {
            Ok((0..*n).map(|_| stream.gen_range(0.0..1.0)).sum())
        }
    }

    #[test]
    fn trait_impl_draws_from_given_stream() {
        let manager = StreamManager::new(7);
        let a = UniformSum.call(&4, &mut manager.stream(0).unwrap()).unwrap();
        let b = UniformSum.call(&4, &mut manager.stream(0).unwrap()).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn closure_errors_are_normalized_to_message() {
        let f = task_fn(|x: &i32, _s: &mut StreamState| -> Result<i32, std::num::ParseIntError> {
            "nope".parse::<i32>().map(|v| v + x)
        });
        let err = f
            .call(&1, &mut StreamManager::new(1).stream(0).unwrap())
            .unwrap_err();
        assert_eq!(err.message(), "invalid digit found in string");
    }

    #[test]
    fn closure_behind_trait_object() {
        let f: Box<dyn TaskFn<u32, u32>> =
            Box::new(task_fn(|x: &u32, _s: &mut StreamState| -> Result<u32, TaskError> {
                Ok(x * 2)
            }));
        let out = f.call(&21, &mut StreamManager::new(1).stream(0).unwrap());
        assert_eq!(out, Ok(42));
    }
}
