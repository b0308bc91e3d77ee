//! Ports - 抽象化レイヤー
//!
//! 外部システム（Redis、ID 生成、時刻）へのインターフェースを定義します。
//! app 層はこれらの trait だけに依存します。

pub mod clock;
pub mod id_generator;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator, UuidGenerator};
pub use self::store::{Store, StoreError, Subscription};
