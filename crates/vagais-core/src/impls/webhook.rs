//! Webhook EventSink (reqwest).
//!
//! 1 イベントを設定された全 URL に JSON で POST する。どれか 1 つでも失敗すれば
//! そのエラーを返し、PublisherLoop が再送を判断する（再送時は全 URL に送り直すので
//! 受信側から見ると at-least-once）。

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::DomainEvent;
use crate::ports::{EventSink, SinkError};

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebhookSink {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl WebhookSink {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(Self { client, urls })
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    async fn post(&self, url: &str, event: &DomainEvent) -> Result<(), SinkError> {
        let response = self
            .client
            .post(url)
            .json(event)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(url, status = status.as_u16(), "webhook delivered");
            Ok(())
        } else {
            Err(SinkError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    async fn publish(&self, event: &DomainEvent) -> Result<(), SinkError> {
        let mut first_error = None;
        for url in &self.urls {
            if let Err(err) = self.post(url, event).await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
