//! Runtime - record の作成・参照・キャンセル
//!
//! 作成系はすべて `submit` を通る:
//! 1. handler の存在確認
//! 2. queue の空きを確保（満杯なら `Saturated`、record は作らない）
//! 3. 初期状態の record を保存
//! 4. dispatcher に渡して即座に返す（background の完了は待たない）

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use super::dispatcher::Dispatcher;
use super::status::{RecordStats, StatsRange};
use super::tasks::{AgentRun, NotificationRequest, PaymentRefund, PaymentRequest};
use super::terminal::TerminalWriter;
use crate::domain::{
    Actor, AgentId, NewRecord, Record, RecordId, RecordKind, RecordStatus, SubjectId, TaskType,
};
use crate::error::DispatchError;
use crate::ports::{
    CatalogStore, Clock, IdGenerator, RecordPage, RecordQuery, RecordStore, StatsFilter,
};
use crate::typed::{PayloadCodec, Task, TypedRegistry};

pub struct Runtime {
    records: Arc<dyn RecordStore>,
    catalog: Arc<dyn CatalogStore>,
    registry: Arc<TypedRegistry>,
    dispatcher: Arc<Dispatcher>,
    writer: Arc<TerminalWriter>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Runtime {
    pub(crate) fn new(
        records: Arc<dyn RecordStore>,
        catalog: Arc<dyn CatalogStore>,
        registry: Arc<TypedRegistry>,
        dispatcher: Arc<Dispatcher>,
        writer: Arc<TerminalWriter>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records,
            catalog,
            registry,
            dispatcher,
            writer,
            ids,
            clock,
        }
    }

    /// Persist a record for `task` and hand it to the worker pool.
    ///
    /// Returns once the creation write is durable; the record is in its
    /// kind's initial state.
    pub async fn submit<T: Task>(
        &self,
        actor: &Actor,
        kind: RecordKind,
        subject_id: SubjectId,
        task: &T,
    ) -> Result<Record, DispatchError> {
        let handler = self
            .registry
            .get(T::TYPE)
            .ok_or_else(|| DispatchError::HandlerNotFound(T::TYPE.to_string()))?;
        let input =
            PayloadCodec::encode(task).map_err(|e| DispatchError::Validation(e.to_string()))?;

        let admission = self.dispatcher.reserve().inspect_err(|err| {
            warn!(task_type = T::TYPE, owner_id = %actor.user_id, error = %err, "record rejected");
        })?;

        let record = Record::new(
            self.ids.generate_record_id(),
            NewRecord {
                kind,
                task_type: TaskType::new(T::TYPE),
                owner_id: actor.user_id,
                organization_id: actor.organization_id,
                subject_id,
                input,
            },
            self.clock.now(),
        );
        // 失敗したら admission が drop されて枠が戻る
        self.records.insert(&record).await?;
        admission.dispatch(record.clone(), handler);

        info!(
            record_id = %record.id,
            kind = %record.kind,
            task_type = %record.task_type,
            owner_id = %record.owner_id,
            subject_id = %record.subject_id,
            "record dispatched"
        );
        Ok(record)
    }

    /// Start an agent execution. The agent must exist, be enabled, and be
    /// runnable by the actor.
    pub async fn create_execution(
        &self,
        actor: &Actor,
        agent_id: AgentId,
        input: Value,
    ) -> Result<Record, DispatchError> {
        let agent = self
            .catalog
            .get_agent(agent_id)
            .await?
            .filter(|agent| agent.is_enabled)
            .ok_or_else(|| DispatchError::not_found(format!("agent {agent_id}")))?;
        if !agent.can_run(actor.user_id) {
            return Err(DispatchError::Permission(format!(
                "agent {agent_id} is private"
            )));
        }
        self.submit(
            actor,
            RecordKind::Execution,
            SubjectId::new(agent_id.to_string()),
            &AgentRun(input),
        )
        .await
    }

    pub async fn create_payment(
        &self,
        actor: &Actor,
        request: PaymentRequest,
    ) -> Result<Record, DispatchError> {
        let charge = request.validate()?;
        let subject = SubjectId::new(charge.provider.as_str());
        self.submit(actor, RecordKind::Payment, subject, &charge).await
    }

    /// Refund a completed payment owned by the actor.
    ///
    /// A payment is refunded at most once: a pending, running or completed
    /// refund for it makes another request a `Conflict`. Failed or cancelled
    /// refunds do not count.
    pub async fn refund_payment(
        &self,
        actor: &Actor,
        payment_id: RecordId,
        reason: String,
    ) -> Result<Record, DispatchError> {
        let payment = self.get(payment_id).await?;
        if payment.owner_id != actor.user_id {
            return Err(DispatchError::Permission(
                "unauthorized to refund this payment".to_string(),
            ));
        }
        let refund = PaymentRefund::for_payment(&payment, reason)?;

        let subject = SubjectId::new(payment_id.to_string());
        let mut previous = StatsFilter::for_subject(RecordKind::Refund, subject.clone());
        previous.owner_id = Some(actor.user_id);
        let previous = self.records.counts(&previous).await?;
        if previous.pending + previous.running + previous.completed > 0 {
            return Err(DispatchError::Conflict(format!(
                "payment {payment_id} is already refunded"
            )));
        }
        self.submit(actor, RecordKind::Refund, subject, &refund).await
    }

    pub async fn send_notification(
        &self,
        actor: &Actor,
        request: NotificationRequest,
    ) -> Result<Record, DispatchError> {
        let delivery = request.validate()?;
        let subject = SubjectId::new(delivery.channel.as_str());
        self.submit(actor, RecordKind::Notification, subject, &delivery)
            .await
    }

    /// Current snapshot of a record.
    pub async fn get(&self, id: RecordId) -> Result<Record, DispatchError> {
        self.records
            .get(id)
            .await?
            .ok_or_else(|| DispatchError::not_found(format!("record {id}")))
    }

    pub async fn list(&self, query: RecordQuery) -> Result<RecordPage, DispatchError> {
        Ok(self.records.list(&query.normalized()).await?)
    }

    /// Start of `range` by this runtime's clock.
    pub fn range_start(&self, range: StatsRange) -> Option<DateTime<Utc>> {
        range.since(self.clock.now())
    }

    /// The actor's own records, optionally only those created at or after `since`.
    pub async fn stats(
        &self,
        actor: &Actor,
        since: Option<DateTime<Utc>>,
    ) -> Result<RecordStats, DispatchError> {
        let filter = StatsFilter::for_owner(actor.user_id).since(since);
        Ok(self.records.counts(&filter).await?.into())
    }

    /// Every execution of one agent, whoever ran it. Creator only.
    pub async fn agent_stats(
        &self,
        actor: &Actor,
        agent_id: AgentId,
        since: Option<DateTime<Utc>>,
    ) -> Result<RecordStats, DispatchError> {
        let agent = self
            .catalog
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| DispatchError::not_found(format!("agent {agent_id}")))?;
        if agent.creator_id != actor.user_id {
            return Err(DispatchError::Permission(
                "only the creator can see agent stats".to_string(),
            ));
        }
        let filter =
            StatsFilter::for_subject(RecordKind::Execution, SubjectId::new(agent_id.to_string()))
                .since(since);
        Ok(self.records.counts(&filter).await?.into())
    }

    /// Owner-requested `running -> cancelled`.
    ///
    /// The record is unchanged on every error. The handler is only signalled;
    /// whatever it produces afterwards is discarded.
    pub async fn cancel(&self, actor: &Actor, id: RecordId) -> Result<Record, DispatchError> {
        let record = self.get(id).await?;
        if record.owner_id != actor.user_id {
            return Err(DispatchError::Permission(
                "only the owner can cancel a record".to_string(),
            ));
        }
        if record.status != RecordStatus::Running {
            return Err(DispatchError::not_active(record.status));
        }

        let Some(cancelled) = self.writer.cancel(id).await? else {
            // get と cancel の間に終端へ進んだ
            let current = self.get(id).await?;
            return Err(DispatchError::not_active(current.status));
        };
        let signalled = self.dispatcher.signal_cancel(id);
        info!(record_id = %id, signalled, "record cancelled");
        Ok(cancelled)
    }
}
