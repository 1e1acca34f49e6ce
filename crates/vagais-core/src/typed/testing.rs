//! テスト用の Task / Handler

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use ulid::Ulid;

use super::context::{CancelToken, TaskContext};
use super::handler::Handler;
use super::task::Task;
use crate::domain::{RecordId, SubjectId, TaskError, UserId};

pub fn test_context(attempt: u32) -> TaskContext {
    TaskContext {
        record_id: RecordId::from_ulid(Ulid::new()),
        owner_id: UserId::from_ulid(Ulid::new()),
        subject_id: SubjectId::new("test"),
        attempt,
        cancel: CancelToken::never(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoTask {
    pub x: i64,
}

impl Task for EchoTask {
    const TYPE: &'static str = "test.echo.reply.v1";
}

/// 待ってから固定値を返す
#[derive(Debug, Clone, Default)]
pub struct EchoHandler {
    pub delay: Duration,
    pub reply: Value,
}

impl EchoHandler {
    pub fn replying(reply: Value) -> Self {
        Self {
            delay: Duration::ZERO,
            reply,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Handler<EchoTask> for EchoHandler {
    async fn handle(&self, _task: EchoTask, _ctx: TaskContext) -> Result<Value, TaskError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.reply.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanicTask {
    pub message: String,
}

impl Task for PanicTask {
    const TYPE: &'static str = "test.panic.explode.v1";
}

pub struct PanicHandler;

#[async_trait]
impl Handler<PanicTask> for PanicHandler {
    async fn handle(&self, task: PanicTask, _ctx: TaskContext) -> Result<Value, TaskError> {
        panic!("{}", task.message);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlakyTask {
    /// この回数だけ transient エラーを返してから成功する
    pub fail_times: u32,
    #[serde(default)]
    pub permanent: bool,
}

impl Task for FlakyTask {
    const TYPE: &'static str = "test.flaky.call.v1";
}

#[derive(Debug, Clone, Default)]
pub struct FlakyHandler {
    pub calls: Arc<AtomicU32>,
}

#[async_trait]
impl Handler<FlakyTask> for FlakyHandler {
    async fn handle(&self, task: FlakyTask, ctx: TaskContext) -> Result<Value, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if task.permanent {
            return Err(TaskError::permanent("card declined"));
        }
        if ctx.attempt <= task.fail_times {
            return Err(TaskError::transient(format!("provider 503 on attempt {}", ctx.attempt)));
        }
        Ok(json!({"attempt": ctx.attempt}))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepTask {
    pub ms: u64,
}

impl Task for SleepTask {
    const TYPE: &'static str = "test.sleep.wait.v1";
}

/// 指定時間眠る。キャンセルされたら途中で permanent エラー
pub struct SleepHandler;

#[async_trait]
impl Handler<SleepTask> for SleepHandler {
    async fn handle(&self, task: SleepTask, ctx: TaskContext) -> Result<Value, TaskError> {
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(TaskError::permanent("cancelled")),
            _ = tokio::time::sleep(Duration::from_millis(task.ms)) => Ok(json!({"slept_ms": task.ms})),
        }
    }
}
