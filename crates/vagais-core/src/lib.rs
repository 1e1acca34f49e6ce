//! vagais-core
//!
//! Record lifecycle runtime for the vagais agent marketplace.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, record, state, outcome, errors, events, agent）
//! - **ports**: 抽象化レイヤー（RecordStore, CatalogStore, EventSink, Clock, IdGenerator）
//! - **typed**: 型付き Task API（Task trait, Handler trait, TypedRegistry, PayloadCodec）
//! - **app**: アプリケーションロジック（builder, runtime, dispatcher, background loops）
//! - **impls**: ports の実装（InMemoryStore, SqliteStore, WebhookSink, 組み込み handler）
//! - **api**: axum の HTTP 表面
//! - **error**: 呼び出し側に同期で返るエラー

pub mod api;
pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod typed;
