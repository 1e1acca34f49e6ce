//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: 開発・テスト用の RecordStore + CatalogStore
//! - **SqliteStore**: sqlx による永続化（`sqlite::memory:` でテストも可）
//! - **WebhookSink**: 終端イベントの HTTP 配送
//! - **handlers**: 4 種類の record を処理する組み込み Handler

pub mod handlers;
pub mod memory;
pub mod sqlite;
pub mod webhook;

// 主要な型を再エクスポート
pub use self::handlers::SimulationConfig;
pub use self::memory::InMemoryStore;
pub use self::sqlite::SqliteStore;
pub use self::webhook::WebhookSink;
