//! Handler - record の background 処理本体
//!
//! `Handler<T>` は型付きで書き、dispatcher には `DynHandler`（JSON in / JSON out）
//! として渡す。

use super::codec::PayloadCodec;
use super::context::TaskContext;
use super::task::Task;
use crate::domain::errors::TaskError;
use async_trait::async_trait;
use std::marker::PhantomData;

/// Handler は Task を実行して Record.output になる JSON を返す
///
/// # 使用例
/// ```ignore
/// struct SendReceiptHandler;
///
/// #[async_trait]
/// impl Handler<SendReceipt> for SendReceiptHandler {
///     async fn handle(&self, task: SendReceipt, ctx: TaskContext) -> Result<Value, TaskError> {
///         if ctx.is_cancelled() {
///             return Err(TaskError::permanent("cancelled"));
///         }
///         Ok(json!({"sent_to": task.email}))
///     }
/// }
/// ```
///
/// # エラー分類
/// - `TaskError::transient` はリトライされる
/// - `TaskError::permanent` は即 failed
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T, ctx: TaskContext) -> Result<serde_json::Value, TaskError>;
}

/// What the dispatcher calls: decodes `Record::input` and runs the typed handler.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        payload: serde_json::Value,
        ctx: TaskContext,
    ) -> Result<serde_json::Value, TaskError>;

    fn task_type(&self) -> &'static str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn(T)>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        payload: serde_json::Value,
        ctx: TaskContext,
    ) -> Result<serde_json::Value, TaskError> {
        // 入力が読めないのは何度やっても同じ
        let task: T =
            PayloadCodec::decode(payload).map_err(|e| TaskError::permanent(e.to_string()))?;
        self.handler.handle(task, ctx).await
    }

    fn task_type(&self) -> &'static str {
        T::TYPE
    }
}
