//! PublisherLoop - 終端イベントの外部配送
//!
//! # フロー
//! 1. TerminalWriter が積んだ DomainEvent を受け取る
//! 2. EventSink::publish()（retryable なエラーは RetryPolicy で再送）
//! 3. 最後まで失敗したらログを出して捨てる（best-effort）

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use crate::domain::DomainEvent;
use crate::ports::{EventSink, SinkError};

pub struct PublisherLoop {
    events: mpsc::Receiver<DomainEvent>,
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
}

impl PublisherLoop {
    pub fn new(
        events: mpsc::Receiver<DomainEvent>,
        sink: Arc<dyn EventSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            events,
            sink,
            retry,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.deliver(&event).await,
                    None => return,
                },
                _ = shutdown_rx.changed() => break,
            }
        }

        // 停止前にバッファに残っている分は 1 回ずつだけ試す
        self.events.close();
        while let Ok(event) = self.events.try_recv() {
            if let Err(err) = self.sink.publish(&event).await {
                warn!(record_id = %event.data.id, error = %err, "event dropped at shutdown");
            }
        }
    }

    /// Deliver one event, retrying retryable sink errors.
    pub async fn deliver(&self, event: &DomainEvent) {
        match self.publish_with_retry(event).await {
            Ok(attempts) => debug!(record_id = %event.data.id, attempts, "event delivered"),
            Err((attempts, err)) => warn!(
                record_id = %event.data.id,
                attempts,
                error = %err,
                "event delivery failed, dropping"
            ),
        }
    }

    async fn publish_with_retry(&self, event: &DomainEvent) -> Result<u32, (u32, SinkError)> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.sink.publish(event).await {
                Ok(()) => return Ok(attempts),
                Err(err) if err.is_retryable() && self.retry.allows_retry(attempts) => {
                    tokio::time::sleep(self.retry.next_delay(attempts)).await;
                }
                Err(err) => return Err((attempts, err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        NewRecord, Outcome, Record, RecordId, RecordKind, SubjectId, TaskType, Terminal, UserId,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::time::Duration;
    use ulid::Ulid;

    /// 最初の `failures` 回は指定のエラーを返す
    struct ScriptedSink {
        failures: Mutex<Vec<SinkError>>,
        delivered: Mutex<Vec<DomainEvent>>,
        calls: Mutex<u32>,
    }

    impl ScriptedSink {
        fn new(failures: Vec<SinkError>) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                delivered: Mutex::new(Vec::new()),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl EventSink for ScriptedSink {
        async fn publish(&self, event: &DomainEvent) -> Result<(), SinkError> {
            *self.calls.lock().unwrap() += 1;
            let next = {
                let mut failures = self.failures.lock().unwrap();
                if failures.is_empty() {
                    None
                } else {
                    Some(failures.remove(0))
                }
            };
            match next {
                Some(err) => Err(err),
                None => {
                    self.delivered.lock().unwrap().push(event.clone());
                    Ok(())
                }
            }
        }
    }

    fn completed_event() -> DomainEvent {
        let now = Utc::now();
        let mut record = Record::new(
            RecordId::from_ulid(Ulid::new()),
            NewRecord {
                kind: RecordKind::Notification,
                task_type: TaskType::new("vagais.notification.deliver.v1"),
                owner_id: UserId::from_ulid(Ulid::new()),
                organization_id: None,
                subject_id: SubjectId::new("in_app"),
                input: serde_json::json!({}),
            },
            now,
        );
        record
            .finish(&Terminal::new(Outcome::completed(serde_json::json!({})), 0, 1), now)
            .unwrap();
        DomainEvent::terminal(record, now).unwrap()
    }

    fn publisher(sink: Arc<ScriptedSink>) -> PublisherLoop {
        let (_tx, rx) = mpsc::channel(8);
        PublisherLoop::new(rx, sink, RetryPolicy::standard())
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_are_retried_until_delivered() {
        let sink = ScriptedSink::new(vec![
            SinkError::Status(503),
            SinkError::Transport("reset".into()),
        ]);
        publisher(Arc::clone(&sink)).deliver(&completed_event()).await;

        assert_eq!(*sink.calls.lock().unwrap(), 3);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let sink = ScriptedSink::new(vec![SinkError::Status(500); 5]);
        publisher(Arc::clone(&sink)).deliver(&completed_event()).await;

        assert_eq!(*sink.calls.lock().unwrap(), 3);
        assert!(sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let sink = ScriptedSink::new(vec![SinkError::Status(400)]);
        publisher(Arc::clone(&sink)).deliver(&completed_event()).await;

        assert_eq!(*sink.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn buffered_events_are_flushed_on_shutdown() {
        let sink = ScriptedSink::new(Vec::new());
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(completed_event()).await.unwrap();
        tx.send(completed_event()).await.unwrap();
        shutdown_tx.send_replace(true);

        let publisher = PublisherLoop::new(rx, sink.clone(), RetryPolicy::standard());
        tokio::time::timeout(Duration::from_secs(1), publisher.run(shutdown_rx))
            .await
            .unwrap();
        assert_eq!(sink.delivered.lock().unwrap().len(), 2);
    }
}
