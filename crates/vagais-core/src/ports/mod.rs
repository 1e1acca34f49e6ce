//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。各 trait は外部システム
//! （SQLite, webhook endpoint, 時計）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - RecordStore が Record の正本（source of truth）
//! - カウンタ更新はストアのアトミック操作だけで行う
//! - 時刻と ID は注入する（テストで固定できるように）

pub mod catalog_store;
pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod record_store;

pub use self::catalog_store::{CatalogStore, ReviewPage};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink, SinkError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::record_store::{
    RecordPage, RecordQuery, RecordStore, StatsFilter, StatusCounts, clamp_paging, paging_offset,
};
