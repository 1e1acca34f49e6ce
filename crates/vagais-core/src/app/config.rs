//! RuntimeConfig - dispatcher と background loop の設定値

use std::time::Duration;

use super::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Worker pool size.
    pub workers: usize,

    /// Bounded queue size; a full queue rejects new records with `Saturated`.
    pub queue_capacity: usize,

    /// Deadline for one record's work, retries included.
    pub task_timeout: Duration,

    /// Retry for transient task errors.
    pub retry: RetryPolicy,

    /// Non-terminal records older than this are failed by the reaper.
    pub stale_after: Duration,
    pub reap_interval: Duration,
    pub reap_batch: usize,

    /// Terminal records older than this are deleted by the GC.
    pub retention: Duration,
    pub gc_interval: Duration,

    /// Buffered terminal events waiting for the publisher.
    pub event_buffer: usize,

    /// Retry for event sink delivery.
    pub webhook_retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            task_timeout: Duration::from_secs(30),
            retry: RetryPolicy::standard(),
            stale_after: Duration::from_secs(10 * 60),
            reap_interval: Duration::from_secs(60),
            reap_batch: 100,
            retention: Duration::from_secs(30 * 24 * 60 * 60),
            gc_interval: Duration::from_secs(60 * 60),
            event_buffer: 1024,
            webhook_retry: RetryPolicy::standard(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("stale_after ({stale_after:?}) must exceed task_timeout ({task_timeout:?})")]
    StaleBeforeTimeout {
        stale_after: Duration,
        task_timeout: Duration,
    },
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("workers", self.workers),
            ("queue_capacity", self.queue_capacity),
            ("event_buffer", self.event_buffer),
            ("reap_batch", self.reap_batch),
            ("retry.max_attempts", self.retry.max_attempts as usize),
            ("webhook_retry.max_attempts", self.webhook_retry.max_attempts as usize),
        ];
        if let Some((name, _)) = non_zero.into_iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(name));
        }
        if self.task_timeout.is_zero() {
            return Err(ConfigError::Zero("task_timeout"));
        }
        // 他プロセスの worker がまだ deadline 内で走っている record は回収しない
        if self.stale_after <= self.task_timeout {
            return Err(ConfigError::StaleBeforeTimeout {
                stale_after: self.stale_after,
                task_timeout: self.task_timeout,
            });
        }
        Ok(())
    }
}
