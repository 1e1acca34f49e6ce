//! TerminalWriter - 終端遷移の書き込みと、その後始末
//!
//! dispatcher / reaper / cancel の 3 経路がここを通る:
//! 1. RecordStore の条件付き更新（既に終端なら no-op）
//! 2. 実行完了なら Agent の usage_count をアトミックに加算
//! 3. 終端イベントを publisher に渡す（バッファが一杯なら捨てる）

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::{AgentId, DomainEvent, Record, RecordId, RecordKind, RecordStatus, Terminal};
use crate::error::StoreError;
use crate::ports::{CatalogStore, Clock, RecordStore};

pub struct TerminalWriter {
    records: Arc<dyn RecordStore>,
    catalog: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
    events: mpsc::Sender<DomainEvent>,
}

impl TerminalWriter {
    pub fn new(
        records: Arc<dyn RecordStore>,
        catalog: Arc<dyn CatalogStore>,
        clock: Arc<dyn Clock>,
        events: mpsc::Sender<DomainEvent>,
    ) -> Self {
        Self {
            records,
            catalog,
            clock,
            events,
        }
    }

    /// Write the terminal state of `record`.
    ///
    /// Returns `false` when the store already held a terminal state; that is
    /// the expected outcome of a race (timeout vs. late completion, cancel vs.
    /// completion) and is only logged.
    pub async fn finish(&self, mut record: Record, terminal: Terminal) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let applied = self.records.finish(record.id, &terminal, now).await?;
        if !applied {
            debug!(
                record_id = %record.id,
                status = %terminal.outcome.status(),
                "terminal write skipped: record already terminal"
            );
            return Ok(false);
        }

        // store と同じ遷移を手元のスナップショットにも適用してイベントに載せる
        if let Err(err) = record.finish(&terminal, now) {
            warn!(record_id = %record.id, error = %err, "snapshot diverged from store");
            return Ok(true);
        }

        if record.kind == RecordKind::Execution && record.status == RecordStatus::Completed {
            self.count_usage(&record).await;
        }

        self.emit(record);
        Ok(true)
    }

    /// `running -> cancelled`. Returns the cancelled record, or `None` when the
    /// record was not running anymore.
    pub async fn cancel(&self, id: RecordId) -> Result<Option<Record>, StoreError> {
        let now = self.clock.now();
        if !self.records.cancel(id, now).await? {
            return Ok(None);
        }
        let record = self.records.get(id).await?;
        if let Some(record) = &record {
            self.emit(record.clone());
        }
        Ok(record)
    }

    async fn count_usage(&self, record: &Record) {
        let agent_id = match record.subject_id.as_str().parse::<AgentId>() {
            Ok(agent_id) => agent_id,
            Err(err) => {
                warn!(record_id = %record.id, subject_id = %record.subject_id, error = %err, "execution subject is not an agent id");
                return;
            }
        };
        match self.catalog.increment_usage(agent_id, 1).await {
            Ok(true) => {}
            Ok(false) => warn!(record_id = %record.id, agent_id = %agent_id, "agent vanished before usage was counted"),
            Err(err) => warn!(record_id = %record.id, agent_id = %agent_id, error = %err, "usage increment failed"),
        }
    }

    fn emit(&self, record: Record) {
        let record_id = record.id;
        let Some(event) = DomainEvent::terminal(record, self.clock.now()) else {
            return;
        };
        if let Err(err) = self.events.try_send(event) {
            warn!(record_id = %record_id, error = %err, "terminal event dropped");
        }
    }
}
