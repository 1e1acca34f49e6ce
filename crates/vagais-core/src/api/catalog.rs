//! Catalog routes: agents and reviews.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use super::ApiState;
use super::auth::CurrentActor;
use super::records::StatsParams;
use super::response::{ApiResult, created, ok};
use crate::app::ReviewInput;
use crate::domain::{AgentId, NewAgent, ReviewId};

#[derive(Debug, Deserialize)]
pub struct AgentPatch {
    pub is_enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
}

#[derive(Debug, Deserialize)]
pub struct ReviewResponse {
    pub response: String,
}

/// POST /agents
pub(crate) async fn register_agent(
    State(state): State<ApiState>,
    actor: CurrentActor,
    body: Result<Json<NewAgent>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    Ok(created(state.catalog.register_agent(&actor.0, body).await?))
}

/// GET /agents/{id}
pub(crate) async fn get_agent(
    State(state): State<ApiState>,
    _actor: CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id: AgentId = id.parse()?;
    Ok(ok(state.catalog.get_agent(id).await?))
}

/// PATCH /agents/{id}
pub(crate) async fn update_agent(
    State(state): State<ApiState>,
    actor: CurrentActor,
    Path(id): Path<String>,
    body: Result<Json<AgentPatch>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let id: AgentId = id.parse()?;
    let Json(body) = body?;
    let agent = state
        .catalog
        .set_agent_enabled(&actor.0, id, body.is_enabled)
        .await?;
    Ok(ok(agent))
}

/// POST /agents/{id}/reviews
pub(crate) async fn create_review(
    State(state): State<ApiState>,
    actor: CurrentActor,
    Path(id): Path<String>,
    body: Result<Json<ReviewInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let agent_id: AgentId = id.parse()?;
    let Json(body) = body?;
    let review = state.catalog.create_review(&actor.0, agent_id, body).await?;
    Ok(created(review))
}

/// GET /agents/{id}/reviews
pub(crate) async fn list_reviews(
    State(state): State<ApiState>,
    _actor: CurrentActor,
    Path(id): Path<String>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let agent_id: AgentId = id.parse()?;
    let Query(params) = params?;
    let page = state
        .catalog
        .list_reviews(agent_id, params.page, params.limit)
        .await?;
    Ok(ok(page))
}

/// GET /agents/{id}/stats
pub(crate) async fn agent_stats(
    State(state): State<ApiState>,
    actor: CurrentActor,
    Path(id): Path<String>,
    params: Result<Query<StatsParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let agent_id: AgentId = id.parse()?;
    let Query(params) = params?;
    let since = params.since(&state);
    Ok(ok(state.runtime.agent_stats(&actor.0, agent_id, since).await?))
}

/// POST /reviews/{id}/response
pub(crate) async fn respond_to_review(
    State(state): State<ApiState>,
    actor: CurrentActor,
    Path(id): Path<String>,
    body: Result<Json<ReviewResponse>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let id: ReviewId = id.parse()?;
    let Json(body) = body?;
    let review = state
        .catalog
        .respond_to_review(&actor.0, id, body.response)
        .await?;
    Ok(ok(review))
}

/// PUT /reviews/{id}
pub(crate) async fn update_review(
    State(state): State<ApiState>,
    actor: CurrentActor,
    Path(id): Path<String>,
    body: Result<Json<ReviewInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let id: ReviewId = id.parse()?;
    let Json(body) = body?;
    Ok(ok(state.catalog.update_review(&actor.0, id, body).await?))
}

/// DELETE /reviews/{id}
pub(crate) async fn delete_review(
    State(state): State<ApiState>,
    actor: CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id: ReviewId = id.parse()?;
    state.catalog.delete_review(&actor.0, id).await?;
    Ok(ok(serde_json::json!({"deleted": id})))
}
