//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。dispatcher は時刻とワーカー通信を
//! この trait 越しにしか触らないので、テストでは差し替えられる。

pub mod clock;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::transport::{WorkerContext, WorkerEvent, WorkerLink, WorkerTransport};
