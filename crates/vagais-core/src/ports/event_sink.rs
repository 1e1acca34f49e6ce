//! EventSink port - 終端イベントの外部配送
//!
//! - NoopEventSink: 何もしない（webhook 未設定時）
//! - impls::webhook::WebhookSink: HTTP POST

use async_trait::async_trait;

use crate::domain::DomainEvent;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint responded with status {0}")]
    Status(u16),

    #[error("payload rejected: {0}")]
    Rejected(String),
}

impl SinkError {
    /// transport 失敗と 5xx / 429 は再送する
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Transport(_) => true,
            SinkError::Status(code) => *code >= 500 || *code == 429,
            SinkError::Rejected(_) => false,
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish(&self, _event: &DomainEvent) -> Result<(), SinkError> {
        Ok(())
    }
}
