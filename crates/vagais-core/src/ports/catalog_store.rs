//! CatalogStore port - Agent / Review と派生カウンタ
//!
//! カウンタは読み取り→加算→書き込みをしない:
//! - usage_count はストア側のアトミック加算（`usage_count = usage_count + ?`）
//! - rating / review_count はレビュー集合から毎回再計算（AVG / COUNT）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Agent, AgentId, RatingSummary, Review, ReviewId, UserId};
use crate::error::StoreError;

/// 1 agent のレビュー一覧（新しい順）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPage {
    pub items: Vec<Review>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_agent(&self, agent: &Agent) -> Result<(), StoreError>;

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError>;

    /// 存在しなければ `false`
    async fn set_agent_enabled(
        &self,
        id: AgentId,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// アトミックに `usage_count += by`。存在しなければ `false`
    async fn increment_usage(&self, id: AgentId, by: u64) -> Result<bool, StoreError>;

    /// (agent_id, user_id) が既にあれば `StoreError::Duplicate`
    async fn insert_review(&self, review: &Review) -> Result<(), StoreError>;

    async fn get_review(&self, id: ReviewId) -> Result<Option<Review>, StoreError>;

    async fn find_review(
        &self,
        agent_id: AgentId,
        user_id: UserId,
    ) -> Result<Option<Review>, StoreError>;

    /// rating / title / content / response / updated_at を更新。存在しなければ `false`
    async fn update_review(&self, review: &Review) -> Result<bool, StoreError>;

    /// created_at DESC, id DESC。page / limit は正規化済みで渡す
    async fn list_reviews(
        &self,
        agent_id: AgentId,
        page: u32,
        limit: u32,
    ) -> Result<ReviewPage, StoreError>;

    async fn delete_review(&self, id: ReviewId) -> Result<bool, StoreError>;

    /// レビュー集合から rating / review_count を再計算して Agent に書き込む
    async fn recompute_rating(
        &self,
        agent_id: AgentId,
        now: DateTime<Utc>,
    ) -> Result<RatingSummary, StoreError>;
}
