//! Built-in handlers for the four record kinds.
//!
//! 外部プロバイダ（LLM 実行 / 決済 / メール・SMS）はまだ無いので、
//! 設定された遅延を待ってから決まった形の output を返す。
//! 待機中にキャンセルされたら permanent error で抜ける。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::app::tasks::{
    AgentRun, NotificationChannel, NotificationDelivery, PaymentCharge, PaymentRefund,
};
use crate::domain::{AgentId, RecordId, TaskError};
use crate::ports::{CatalogStore, Clock};
use crate::typed::{Handler, TaskContext};

/// Simulated provider latencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    pub execution_delay: Duration,
    pub payment_delay: Duration,
    pub refund_delay: Duration,
    pub email_delay: Duration,
    pub sms_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            execution_delay: Duration::from_secs(2),
            payment_delay: Duration::from_secs(2),
            refund_delay: Duration::from_secs(1),
            email_delay: Duration::from_secs(1),
            sms_delay: Duration::from_millis(500),
        }
    }
}

impl SimulationConfig {
    /// 遅延なし（テスト用）
    pub fn instant() -> Self {
        Self {
            execution_delay: Duration::ZERO,
            payment_delay: Duration::ZERO,
            refund_delay: Duration::ZERO,
            email_delay: Duration::ZERO,
            sms_delay: Duration::ZERO,
        }
    }
}

/// `delay` だけ待つ。先にキャンセルされたら Err
async fn simulate(delay: Duration, ctx: &TaskContext) -> Result<(), TaskError> {
    if ctx.is_cancelled() {
        return Err(TaskError::permanent("cancelled before start"));
    }
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = ctx.cancel.cancelled() => Err(TaskError::permanent("cancelled")),
    }
}

/// Provider-side transaction id: prefix + 8 chars of the record ulid.
fn transaction_id(prefix: &str, record_id: RecordId) -> String {
    let ulid = record_id.as_ulid().to_string().to_lowercase();
    let tail = &ulid[ulid.len().saturating_sub(8)..];
    format!("{prefix}{tail}")
}

pub struct AgentExecutionHandler {
    catalog: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
    delay: Duration,
}

impl AgentExecutionHandler {
    pub fn new(catalog: Arc<dyn CatalogStore>, clock: Arc<dyn Clock>, delay: Duration) -> Self {
        Self {
            catalog,
            clock,
            delay,
        }
    }
}

#[async_trait]
impl Handler<AgentRun> for AgentExecutionHandler {
    async fn handle(&self, task: AgentRun, ctx: TaskContext) -> Result<Value, TaskError> {
        let agent_id: AgentId = ctx
            .subject_id
            .as_str()
            .parse()
            .map_err(|e| TaskError::permanent(format!("bad agent id: {e}")))?;
        let agent = self
            .catalog
            .get_agent(agent_id)
            .await
            .map_err(|e| TaskError::transient(format!("catalog unavailable: {e}")))?
            .ok_or_else(|| TaskError::permanent(format!("agent {agent_id} no longer exists")))?;

        simulate(self.delay, &ctx).await?;

        debug!(record_id = %ctx.record_id, agent = %agent.name, "agent run finished");
        Ok(json!({
            "result": "Agent execution completed successfully",
            "agent": agent.name,
            "data": task.0,
            "timestamp": self.clock.now(),
        }))
    }
}

pub struct PaymentHandler {
    delay: Duration,
}

impl PaymentHandler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Handler<PaymentCharge> for PaymentHandler {
    async fn handle(&self, task: PaymentCharge, ctx: TaskContext) -> Result<Value, TaskError> {
        simulate(self.delay, &ctx).await?;
        Ok(json!({
            "provider": task.provider,
            "provider_id": transaction_id(task.provider.transaction_prefix(), ctx.record_id),
            "amount": task.amount,
            "currency": task.currency,
        }))
    }
}

pub struct RefundHandler {
    delay: Duration,
}

impl RefundHandler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Handler<PaymentRefund> for RefundHandler {
    async fn handle(&self, task: PaymentRefund, ctx: TaskContext) -> Result<Value, TaskError> {
        simulate(self.delay, &ctx).await?;
        Ok(json!({
            "provider_id": transaction_id("ref_", ctx.record_id),
            "original_payment_id": task.original_payment_id,
            "amount": task.amount,
            "currency": task.currency,
        }))
    }
}

pub struct NotificationHandler {
    email_delay: Duration,
    sms_delay: Duration,
}

impl NotificationHandler {
    pub fn new(email_delay: Duration, sms_delay: Duration) -> Self {
        Self {
            email_delay,
            sms_delay,
        }
    }
}

#[async_trait]
impl Handler<NotificationDelivery> for NotificationHandler {
    async fn handle(
        &self,
        task: NotificationDelivery,
        ctx: TaskContext,
    ) -> Result<Value, TaskError> {
        let delay = match task.channel {
            NotificationChannel::Email => self.email_delay,
            NotificationChannel::Sms => self.sms_delay,
            NotificationChannel::InApp => Duration::ZERO,
        };
        simulate(delay, &ctx).await?;
        Ok(json!({
            "channel": task.channel,
            "recipient": ctx.owner_id,
            "priority": task.priority,
            "delivered": true,
        }))
    }
}
