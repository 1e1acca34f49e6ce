//! GCLoop - 保持期間を過ぎた終端 record の削除

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::ports::{Clock, RecordStore};

/// GCLoop は `updated_at < now - retention` の終端 record を削除
///
/// pending / running は対象外（それは reaper の仕事）
pub struct GCLoop {
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    interval: Duration,
}

impl GCLoop {
    pub fn new(
        records: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            records,
            clock,
            retention,
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }
            if let Err(err) = self.collect_once().await {
                warn!(error = %err, "gc pass failed");
            }
        }
    }

    /// One pass. Returns the number of deleted records.
    pub async fn collect_once(&self) -> Result<u64, StoreError> {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(30));
        let cutoff = self.clock.now() - retention;
        let deleted = self.records.delete_terminal_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, %cutoff, "old terminal records deleted");
        }
        Ok(deleted)
    }
}
