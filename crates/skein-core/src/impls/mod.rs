//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **LocalTransport**: 同一プロセス内のワーカー（デフォルト）
//!
//! 別プロセスやリモートのワーカーは `WorkerTransport` を実装した別クレートに置く。

pub mod local;

pub use self::local::LocalTransport;
