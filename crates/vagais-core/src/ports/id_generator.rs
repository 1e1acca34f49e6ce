//! IdGenerator port - ID 生成の抽象化
//!
//! テスト容易性のために trait として抽象化しています。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{AgentId, Id, IdMarker, RecordId, ReviewId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator はストアに依存せず ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから使える）
pub trait IdGenerator: Send + Sync {
    fn generate_record_id(&self) -> RecordId;

    fn generate_agent_id(&self) -> AgentId;

    fn generate_review_id(&self) -> ReviewId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock の現在時刻を timestamp 部分に使うので、FixedClock と組み合わせると
/// timestamp 部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Id::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_record_id(&self) -> RecordId {
        self.next()
    }

    fn generate_agent_id(&self) -> AgentId {
        self.next()
    }

    fn generate_review_id(&self) -> ReviewId {
        self.next()
    }
}
