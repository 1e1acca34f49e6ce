//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **Runtime**: record の作成・ポーリング・キャンセル
//! - **Catalog**: agent とレビュー
//! - **Dispatcher**: 有界キュー + worker pool（timeout / retry / panic 隔離）
//! - **PublisherLoop**: 終端イベントの配送
//! - **ReaperLoop**: 終端に達しない record の回収
//! - **GCLoop**: 古い終端 record の削除

pub mod builder;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod gc_loop;
pub mod publisher_loop;
pub mod reaper_loop;
pub mod retry;
pub mod runtime;
pub mod status;
pub mod tasks;
pub mod terminal;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::catalog::{Catalog, ReviewInput};
pub use self::config::{ConfigError, RuntimeConfig};
pub use self::dispatcher::Dispatcher;
pub use self::gc_loop::GCLoop;
pub use self::publisher_loop::PublisherLoop;
pub use self::reaper_loop::ReaperLoop;
pub use self::retry::RetryPolicy;
pub use self::runtime::Runtime;
pub use self::status::{RecordStats, StatsRange};
pub use self::terminal::TerminalWriter;
