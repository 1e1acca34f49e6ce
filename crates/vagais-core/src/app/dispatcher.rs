//! Dispatcher - 固定サイズの worker pool + bounded queue
//!
//! # フロー
//! 1. `reserve()` で queue の空きを確保（満杯なら `Saturated`。record はまだ書かない）
//! 2. 呼び出し側が record を保存（creation write）
//! 3. `Admission::dispatch()` で job を queue に積む
//! 4. worker が handler を deadline 付きで実行（transient エラーは retry）
//! 5. TerminalWriter が終端状態を 1 回だけ書く
//!
//! # 停止
//! - `shutdown()` で受付を止め、queue に残った job も含めて処理し切ってから join

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::RuntimeConfig;
use super::retry::RetryPolicy;
use super::terminal::TerminalWriter;
use crate::domain::{Outcome, Record, RecordId, TaskError, TaskFailure, Terminal};
use crate::error::DispatchError;
use crate::typed::{CancelSignal, CancelToken, DynHandler, TaskContext};

/// One unit of background work: a persisted record and the handler to run.
pub struct Job {
    record: Record,
    handler: Arc<dyn DynHandler>,
    cancel: CancelToken,
    admitted_at: Instant,
}

type Inflight = Arc<Mutex<HashMap<RecordId, CancelSignal>>>;

/// A reserved queue slot. Dropping it without dispatching frees the slot.
pub struct Admission {
    permit: mpsc::OwnedPermit<Job>,
    inflight: Inflight,
    admitted_at: Instant,
}

impl Admission {
    /// Hand the (already persisted) record to the pool.
    pub fn dispatch(self, record: Record, handler: Arc<dyn DynHandler>) {
        let (signal, cancel) = CancelToken::new();
        lock(&self.inflight).insert(record.id, signal);
        self.permit.send(Job {
            record,
            handler,
            cancel,
            admitted_at: self.admitted_at,
        });
    }
}

pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
    capacity: usize,
    inflight: Inflight,
    shutdown_tx: watch::Sender<bool>,
    joins: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn `config.workers` workers. Must be called inside a tokio runtime.
    pub fn spawn(config: &RuntimeConfig, writer: Arc<TerminalWriter>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inflight: Inflight = Arc::default();

        let worker = Arc::new(Worker {
            writer,
            inflight: Arc::clone(&inflight),
            task_timeout: config.task_timeout,
            retry: config.retry.clone(),
        });
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut joins = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let worker = Arc::clone(&worker);
            let rx = Arc::clone(&rx);
            let shutdown_rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, worker, rx, shutdown_rx).await;
            }));
        }
        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "dispatcher started"
        );

        Self {
            tx,
            capacity: config.queue_capacity,
            inflight,
            shutdown_tx,
            joins: tokio::sync::Mutex::new(joins),
        }
    }

    /// Reserve a queue slot without waiting.
    pub fn reserve(&self) -> Result<Admission, DispatchError> {
        match self.tx.clone().try_reserve_owned() {
            Ok(permit) => Ok(Admission {
                permit,
                inflight: Arc::clone(&self.inflight),
                admitted_at: Instant::now(),
            }),
            Err(mpsc::error::TrySendError::Full(_)) => Err(DispatchError::Saturated {
                capacity: self.capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::ShuttingDown),
        }
    }

    /// Signal the record's cancellation token. Returns `false` when the record
    /// is not queued or running here.
    pub fn signal_cancel(&self, id: RecordId) -> bool {
        match lock(&self.inflight).get(&id) {
            Some(signal) => {
                signal.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether the record is queued or running in this process.
    pub fn is_tracking(&self, id: RecordId) -> bool {
        lock(&self.inflight).contains_key(&id)
    }

    /// Free queue slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }

    /// Stop accepting, drain queued jobs, and wait for every worker.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let joins = std::mem::take(&mut *self.joins.lock().await);
        for join in joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker terminated abnormally");
            }
        }
        info!("dispatcher stopped");
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn worker_loop(
    worker_id: usize,
    worker: Arc<Worker>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut draining = false;
    loop {
        let next = {
            let mut rx = rx.lock().await;
            let stopping = draining || *shutdown_rx.borrow();
            if stopping {
                // 新規受付を止め、残っている job は最後まで処理する
                rx.close();
                rx.recv().await
            } else {
                tokio::select! {
                    job = rx.recv() => job,
                    _ = shutdown_rx.changed() => {
                        draining = true;
                        continue;
                    }
                }
            }
        };

        let Some(job) = next else {
            debug!(worker_id, "worker exiting: queue closed and drained");
            break;
        };
        worker.run(worker_id, job).await;
    }
}

struct Worker {
    writer: Arc<TerminalWriter>,
    inflight: Inflight,
    task_timeout: Duration,
    retry: RetryPolicy,
}

impl Worker {
    async fn run(&self, worker_id: usize, job: Job) {
        let Job {
            record,
            handler,
            cancel,
            admitted_at,
        } = job;
        let record_id = record.id;

        if cancel.is_cancelled() {
            // cancel 側が既に終端状態を書いている
            debug!(worker_id, record_id = %record_id, "skipping job cancelled before pickup");
            lock(&self.inflight).remove(&record_id);
            return;
        }

        debug!(worker_id, record_id = %record_id, task_type = %record.task_type, "job started");

        let mut attempts = 0u32;
        let result = tokio::time::timeout(
            self.task_timeout,
            self.attempt(&record, &handler, &cancel, &mut attempts),
        )
        .await;

        let outcome = match result {
            Ok(Ok(output)) => Outcome::completed(output),
            Ok(Err(failure)) => Outcome::failed(failure.to_string()),
            Err(_) => Outcome::failed(
                TaskFailure::Timeout {
                    after_ms: duration_ms(self.task_timeout),
                }
                .to_string(),
            ),
        };
        let terminal = Terminal::new(outcome, duration_ms(admitted_at.elapsed()), attempts);
        let status = terminal.outcome.status();

        match self.writer.finish(record, terminal).await {
            Ok(true) => info!(worker_id, record_id = %record_id, %status, attempts, "job finished"),
            Ok(false) => {}
            Err(err) => {
                // reaper が後で failed にする
                error!(worker_id, record_id = %record_id, error = %err, "terminal write failed");
            }
        }
        lock(&self.inflight).remove(&record_id);
    }

    /// Run the handler until it succeeds, fails permanently, or the retry
    /// budget is spent. `attempts` is readable even when the deadline drops
    /// this future.
    async fn attempt(
        &self,
        record: &Record,
        handler: &Arc<dyn DynHandler>,
        cancel: &CancelToken,
        attempts: &mut u32,
    ) -> Result<Value, TaskFailure> {
        loop {
            *attempts += 1;
            let ctx = TaskContext {
                record_id: record.id,
                owner_id: record.owner_id,
                subject_id: record.subject_id.clone(),
                attempt: *attempts,
                cancel: cancel.clone(),
            };

            let err = match run_isolated(Arc::clone(handler), record.input.clone(), ctx).await {
                Ok(output) => return Ok(output),
                Err(TaskFailure::Task(err)) => err,
                Err(failure) => return Err(failure),
            };

            if !err.is_retryable() || !self.retry.allows_retry(*attempts) || cancel.is_cancelled() {
                return Err(TaskFailure::Task(err));
            }

            let delay = self.retry.next_delay(*attempts);
            warn!(
                record_id = %record.id,
                attempt = *attempts,
                delay_ms = duration_ms(delay),
                kind = ?err.kind(),
                error = %err,
                "transient task error, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(TaskFailure::Task(err)),
            }
        }
    }
}

/// Run one handler call in its own task so a panic stays contained.
async fn run_isolated(
    handler: Arc<dyn DynHandler>,
    input: Value,
    ctx: TaskContext,
) -> Result<Value, TaskFailure> {
    let join = AbortOnDrop(tokio::spawn(async move {
        handler.handle_dyn(input, ctx).await
    }));
    match join.await {
        Ok(result) => result.map_err(TaskFailure::Task),
        Err(err) => Err(join_failure(err)),
    }
}

fn join_failure(err: JoinError) -> TaskFailure {
    if !err.is_panic() {
        return TaskFailure::Task(TaskError::permanent("task aborted"));
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    TaskFailure::Panicked(message)
}

/// JoinHandle that aborts the task when dropped (deadline expiry drops it).
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
