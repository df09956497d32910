//! Typed - ユーザー関数 API
//!
//! クロージャでも独自型でも `TaskFn<P, R>` に揃えて dispatcher に渡す。

pub mod task_fn;

pub use self::task_fn::{FnTask, TaskError, TaskFn, task_fn};
