//! App - アプリケーション層
//!
//! ports を組み合わせて 1 回の run を回す。
//!
//! # 主要コンポーネント
//! - **DispatcherBuilder**: 設定の検証と transport / clock のワイヤリング
//! - **Dispatcher**: ワーカーへの割り当てと結果の回収（状態機械）
//! - **RunControl**: 実行中の cancel / プールサイズ変更

pub mod builder;
pub mod control;
pub mod dispatcher;

pub use self::builder::DispatcherBuilder;
pub use self::control::RunControl;
pub use self::dispatcher::Dispatcher;
