//! IdGenerator port - ID 生成の抽象化
//!
//! Task ids and delivery tags both come from here, so tests can swap in a
//! deterministic source.
//!
//! # 実装
//! - **UuidGenerator**: UUID v4（デフォルト、Celery 自身が使う形式）
//! - **UlidGenerator**: ULID ベース（時刻でソート可能）

use crate::domain::ids::{DeliveryTag, TaskId};
use crate::ports::Clock;
use ulid::Ulid;
use uuid::Uuid;

/// IdGenerator は一意な ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから共有される）
pub trait IdGenerator: Send + Sync {
    /// Task ID を生成
    fn generate_task_id(&self) -> TaskId;

    /// Delivery tag を生成（publish ごとに新しい値）
    fn generate_delivery_tag(&self) -> DeliveryTag;
}

/// Random UUID v4 identifiers, hyphenated lowercase.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate_task_id(&self) -> TaskId {
        TaskId::new(Uuid::new_v4().to_string())
    }

    fn generate_delivery_tag(&self) -> DeliveryTag {
        DeliveryTag::new(Uuid::new_v4().to_string())
    }
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
/// FixedClock を使うと timestamp 部分が固定されます（ランダム部分は残る）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::new(self.next_ulid().to_string())
    }

    fn generate_delivery_tag(&self) -> DeliveryTag {
        DeliveryTag::new(self.next_ulid().to_string())
    }
}
