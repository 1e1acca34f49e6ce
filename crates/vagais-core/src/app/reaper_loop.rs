//! ReaperLoop - 終端に達しないまま放置された record の回収
//!
//! プロセスが落ちると dispatcher の中にあった job は消える。
//! `stale_after` を過ぎても pending/running のまま、かつこのプロセスの
//! dispatcher が持っていない record を failed にする。
//! queue で待っている / 実行中の record は worker が deadline 付きで必ず終端させる。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::terminal::TerminalWriter;
use crate::domain::record::elapsed_ms;
use crate::domain::{Outcome, TaskFailure, Terminal};
use crate::error::StoreError;
use crate::ports::{Clock, RecordStore};

pub struct ReaperLoop {
    records: Arc<dyn RecordStore>,
    writer: Arc<TerminalWriter>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    interval: Duration,
    batch: usize,
}

impl ReaperLoop {
    pub fn new(
        records: Arc<dyn RecordStore>,
        writer: Arc<TerminalWriter>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
        interval: Duration,
        batch: usize,
    ) -> Self {
        Self {
            records,
            writer,
            dispatcher,
            clock,
            stale_after,
            interval,
            batch,
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
            if let Err(err) = self.reap_once().await {
                warn!(error = %err, "reaper pass failed");
            }
        }
    }

    /// One pass. Returns the number of records failed.
    pub async fn reap_once(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let stale = self.records.list_stale(now - stale_after, self.batch).await?;

        let mut reaped = 0;
        for record in stale {
            let record_id = record.id;
            if self.dispatcher.is_tracking(record_id) {
                debug!(record_id = %record_id, "stale record still owned by the dispatcher");
                continue;
            }
            let age_ms = elapsed_ms(record.created_at, now);
            let terminal = Terminal::new(
                Outcome::failed(TaskFailure::Abandoned { stale_ms: age_ms }.to_string()),
                age_ms,
                record.attempts,
            );
            if self.writer.finish(record, terminal).await? {
                // 判定の直後に dispatch された場合だけここに来る
                self.dispatcher.signal_cancel(record_id);
                reaped += 1;
            }
        }
        if reaped > 0 {
            info!(reaped, "stale records failed");
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::RuntimeConfig;
    use crate::domain::{
        DomainEvent, NewRecord, Record, RecordId, RecordKind, RecordStatus, SubjectId, TaskType,
        UserId,
    };
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use tokio::sync::mpsc;
    use ulid::Ulid;

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<FixedClock>,
        reaper: ReaperLoop,
        events: mpsc::Receiver<DomainEvent>,
        dispatcher: Arc<Dispatcher>,
    }

    fn fixture(now: DateTime<Utc>) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(now));
        let (tx, events) = mpsc::channel(16);
        let writer = Arc::new(TerminalWriter::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            tx,
        ));
        let dispatcher = Arc::new(Dispatcher::spawn(&RuntimeConfig::default(), writer.clone()));
        let reaper = ReaperLoop::new(
            store.clone(),
            writer,
            Arc::clone(&dispatcher),
            clock.clone(),
            Duration::from_secs(600),
            Duration::from_secs(60),
            10,
        );
        Fixture {
            store,
            clock,
            reaper,
            events,
            dispatcher,
        }
    }

    fn record(kind: RecordKind, created_at: DateTime<Utc>) -> Record {
        Record::new(
            RecordId::from_ulid(Ulid::new()),
            NewRecord {
                kind,
                task_type: TaskType::new("vagais.payment.charge.v1"),
                owner_id: UserId::from_ulid(Ulid::new()),
                organization_id: None,
                subject_id: SubjectId::new("stripe"),
                input: json!({}),
            },
            created_at,
        )
    }

    #[tokio::test]
    async fn fails_records_left_behind_past_the_threshold() {
        let t0 = Utc::now();
        let mut fx = fixture(t0);
        let orphan = record(RecordKind::Payment, t0);
        let running = record(RecordKind::Execution, t0);
        fx.store.insert(&orphan).await.unwrap();
        fx.store.insert(&running).await.unwrap();

        // まだ閾値前
        fx.clock.advance(chrono::Duration::minutes(5));
        assert_eq!(fx.reaper.reap_once().await.unwrap(), 0);

        let young = record(RecordKind::Payment, fx.clock.now());
        fx.store.insert(&young).await.unwrap();

        fx.clock.advance(chrono::Duration::minutes(6));
        assert_eq!(fx.reaper.reap_once().await.unwrap(), 2);

        for id in [orphan.id, running.id] {
            let reaped = fx.store.get(id).await.unwrap().unwrap();
            assert_eq!(reaped.status, RecordStatus::Failed);
            let error = reaped.error.unwrap();
            assert!(error.starts_with("TimeoutError"), "{error}");
            assert!(error.contains("abandoned"));
            assert_eq!(reaped.duration_ms, Some(11 * 60 * 1000));
        }
        let young = fx.store.get(young.id).await.unwrap().unwrap();
        assert_eq!(young.status, RecordStatus::Pending);

        // 2 回目は何もしない
        assert_eq!(fx.reaper.reap_once().await.unwrap(), 0);

        let first = fx.events.try_recv().unwrap();
        assert_eq!(first.data.status, RecordStatus::Failed);
        fx.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn skips_records_the_dispatcher_still_owns() {
        use crate::typed::testing::{SleepHandler, SleepTask};
        use crate::typed::{PayloadCodec, Task, TypedRegistry};

        let t0 = Utc::now();
        let fx = fixture(t0);
        let mut registry = TypedRegistry::new();
        registry.register::<SleepTask, _>(SleepHandler).unwrap();
        let handler = registry.get(SleepTask::TYPE).unwrap();

        let mut queued = record(RecordKind::Execution, t0);
        queued.input = PayloadCodec::encode(&SleepTask { ms: 60_000 }).unwrap();
        fx.store.insert(&queued).await.unwrap();
        fx.dispatcher
            .reserve()
            .unwrap()
            .dispatch(queued.clone(), handler);
        assert!(fx.dispatcher.is_tracking(queued.id));

        fx.clock.advance(chrono::Duration::minutes(11));
        assert_eq!(fx.reaper.reap_once().await.unwrap(), 0);
        assert!(fx.store.get(queued.id).await.unwrap().unwrap().status.is_active());

        fx.dispatcher.signal_cancel(queued.id);
        fx.dispatcher.shutdown().await;
    }
}
