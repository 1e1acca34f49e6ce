//! Record routes: creation of the four kinds, polling, listing, stats, cancel.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::ApiState;
use super::auth::CurrentActor;
use super::response::{ApiError, ApiResult, created, ok};
use crate::app::StatsRange;
use crate::app::tasks::{NotificationRequest, PaymentRequest};
use crate::domain::{AgentId, Record, RecordId, RecordKind, RecordStatus, SubjectId};
use crate::error::DispatchError;
use crate::ports::RecordQuery;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub agent_id: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub kind: Option<String>,
    pub status: Option<String>,
    pub subject_id: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListParams {
    fn into_query(self, actor: &CurrentActor) -> ApiResult<RecordQuery> {
        let mut query = RecordQuery::for_owner(actor.0.user_id);
        query.kind = self
            .kind
            .map(|k| k.parse::<RecordKind>())
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        query.status = self
            .status
            .map(|s| s.parse::<RecordStatus>())
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        query.subject_id = self.subject_id.map(SubjectId::new);
        if let Some(page) = self.page {
            query.page = page;
        }
        if let Some(limit) = self.limit {
            query.limit = limit;
        }
        Ok(query)
    }
}

/// `?since=` (RFC 3339) が `?range=` より優先
#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub range: Option<StatsRange>,
    pub since: Option<DateTime<Utc>>,
}

impl StatsParams {
    pub(crate) fn since(&self, state: &ApiState) -> Option<DateTime<Utc>> {
        self.since
            .or_else(|| state.runtime.range_start(self.range.unwrap_or_default()))
    }
}

/// 他人の record は存在を隠さずに 403
fn owned(actor: &CurrentActor, record: Record) -> ApiResult<Record> {
    if record.owner_id != actor.0.user_id {
        return Err(DispatchError::Permission("record belongs to another user".to_string()).into());
    }
    Ok(record)
}

/// POST /executions
pub(crate) async fn create_execution(
    State(state): State<ApiState>,
    actor: CurrentActor,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let agent_id: AgentId = body.agent_id.parse()?;
    let record = state
        .runtime
        .create_execution(&actor.0, agent_id, body.input)
        .await?;
    Ok(created(record))
}

/// POST /payments
pub(crate) async fn create_payment(
    State(state): State<ApiState>,
    actor: CurrentActor,
    body: Result<Json<PaymentRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let record = state.runtime.create_payment(&actor.0, body).await?;
    Ok(created(record))
}

/// POST /payments/{id}/refund
pub(crate) async fn refund_payment(
    State(state): State<ApiState>,
    actor: CurrentActor,
    Path(id): Path<String>,
    body: Result<Option<Json<RefundRequest>>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let payment_id: RecordId = id.parse()?;
    // body は省略可（reason なし）
    let reason = body?.map(|Json(b)| b.reason).unwrap_or_default();
    let record = state
        .runtime
        .refund_payment(&actor.0, payment_id, reason)
        .await?;
    Ok(created(record))
}

/// POST /notifications
pub(crate) async fn send_notification(
    State(state): State<ApiState>,
    actor: CurrentActor,
    body: Result<Json<NotificationRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let record = state.runtime.send_notification(&actor.0, body).await?;
    Ok(created(record))
}

/// GET /records
pub(crate) async fn list_records(
    State(state): State<ApiState>,
    actor: CurrentActor,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let page = state.runtime.list(params.into_query(&actor)?).await?;
    Ok(ok(page))
}

/// GET /records/stats
pub(crate) async fn record_stats(
    State(state): State<ApiState>,
    actor: CurrentActor,
    params: Result<Query<StatsParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let since = params.since(&state);
    Ok(ok(state.runtime.stats(&actor.0, since).await?))
}

/// GET /records/{id}
pub(crate) async fn get_record(
    State(state): State<ApiState>,
    actor: CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id: RecordId = id.parse()?;
    let record = owned(&actor, state.runtime.get(id).await?)?;
    Ok(ok(record))
}

/// POST /records/{id}/cancel
pub(crate) async fn cancel_record(
    State(state): State<ApiState>,
    actor: CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id: RecordId = id.parse()?;
    Ok(ok(state.runtime.cancel(&actor.0, id).await?))
}
