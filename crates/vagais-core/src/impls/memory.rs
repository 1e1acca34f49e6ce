//! In-memory store implementation (RecordStore + CatalogStore).
//!
//! すべての状態は 1 つの Mutex の内側にある。条件付き更新とカウンタ加算は
//! ロックを保持したまま判定と書き込みを行うので、SQL の条件付き UPDATE と
//! 同じ原子性になる。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Agent, AgentId, RatingSummary, Record, RecordId, RecordStatus, Review, ReviewId, Terminal,
    UserId,
};
use crate::error::StoreError;
use crate::ports::{
    CatalogStore, RecordPage, RecordQuery, RecordStore, ReviewPage, StatsFilter, StatusCounts,
    paging_offset,
};

#[derive(Default)]
struct InMemoryState {
    /// All records (single source of truth).
    records: HashMap<RecordId, Record>,

    agents: HashMap<AgentId, Agent>,

    reviews: HashMap<ReviewId, Review>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// newest first; ULID 順で同時刻も安定させる
fn newest_first(a: &Record, b: &Record) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert(&self, record: &Record) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(format!("record {}", record.id)));
        }
        state.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: RecordId) -> Result<Option<Record>, StoreError> {
        Ok(self.state.lock().await.records.get(&id).cloned())
    }

    async fn finish(
        &self,
        id: RecordId,
        terminal: &Terminal,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(&id) else {
            return Ok(false);
        };
        if !record.status.is_active() {
            return Ok(false);
        }
        Ok(record.finish(terminal, now).is_ok())
    }

    async fn cancel(&self, id: RecordId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != RecordStatus::Running {
            return Ok(false);
        }
        Ok(record.cancel(now).is_ok())
    }

    async fn list(&self, query: &RecordQuery) -> Result<RecordPage, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<&Record> = state
            .records
            .values()
            .filter(|r| query.matches(r))
            .collect();
        matching.sort_by(|a, b| newest_first(a, b));

        let total = matching.len() as u64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .cloned()
            .collect();
        Ok(RecordPage {
            items,
            total,
            page: query.page,
            limit: query.limit,
        })
    }

    async fn counts(&self, filter: &StatsFilter) -> Result<StatusCounts, StoreError> {
        let state = self.state.lock().await;
        let mut counts = StatusCounts::default();
        let mut duration_sum = 0u64;
        for record in state.records.values().filter(|r| filter.matches(r)) {
            counts.add(record.status, 1);
            if record.status == RecordStatus::Completed {
                duration_sum += record.duration_ms.unwrap_or(0);
            }
        }
        if counts.completed > 0 {
            counts.avg_duration_ms = Some(duration_sum as f64 / counts.completed as f64);
        }
        Ok(counts)
    }

    async fn list_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let state = self.state.lock().await;
        let mut stale: Vec<Record> = state
            .records
            .values()
            .filter(|r| r.status.is_active() && r.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state
            .records
            .retain(|_, r| !(r.status.is_terminal() && r.updated_at < cutoff));
        Ok((before - state.records.len()) as u64)
    }
}

impl InMemoryState {
    fn rating_of(&self, agent_id: AgentId) -> RatingSummary {
        RatingSummary::from_ratings(
            self.reviews
                .values()
                .filter(|r| r.agent_id == agent_id)
                .map(|r| r.rating),
        )
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn insert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.agents.contains_key(&agent.id) {
            return Err(StoreError::Duplicate(format!("agent {}", agent.id)));
        }
        state.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError> {
        Ok(self.state.lock().await.agents.get(&id).cloned())
    }

    async fn set_agent_enabled(
        &self,
        id: AgentId,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(agent) = state.agents.get_mut(&id) else {
            return Ok(false);
        };
        agent.is_enabled = enabled;
        agent.updated_at = now;
        Ok(true)
    }

    async fn increment_usage(&self, id: AgentId, by: u64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(agent) = state.agents.get_mut(&id) else {
            return Ok(false);
        };
        agent.usage_count = agent.usage_count.saturating_add(by);
        Ok(true)
    }

    async fn insert_review(&self, review: &Review) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let duplicate = state
            .reviews
            .values()
            .any(|r| r.agent_id == review.agent_id && r.user_id == review.user_id);
        if duplicate || state.reviews.contains_key(&review.id) {
            return Err(StoreError::Duplicate(format!(
                "review by {} for {}",
                review.user_id, review.agent_id
            )));
        }
        state.reviews.insert(review.id, review.clone());
        Ok(())
    }

    async fn get_review(&self, id: ReviewId) -> Result<Option<Review>, StoreError> {
        Ok(self.state.lock().await.reviews.get(&id).cloned())
    }

    async fn find_review(
        &self,
        agent_id: AgentId,
        user_id: UserId,
    ) -> Result<Option<Review>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .reviews
            .values()
            .find(|r| r.agent_id == agent_id && r.user_id == user_id)
            .cloned())
    }

    async fn update_review(&self, review: &Review) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(existing) = state.reviews.get_mut(&review.id) else {
            return Ok(false);
        };
        existing.rating = review.rating;
        existing.title = review.title.clone();
        existing.content = review.content.clone();
        existing.response = review.response.clone();
        existing.updated_at = review.updated_at;
        Ok(true)
    }

    async fn list_reviews(
        &self,
        agent_id: AgentId,
        page: u32,
        limit: u32,
    ) -> Result<ReviewPage, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<&Review> = state
            .reviews
            .values()
            .filter(|r| r.agent_id == agent_id)
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let offset = usize::try_from(paging_offset(page, limit)).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(ReviewPage {
            items,
            total,
            page,
            limit,
        })
    }

    async fn delete_review(&self, id: ReviewId) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.reviews.remove(&id).is_some())
    }

    async fn recompute_rating(
        &self,
        agent_id: AgentId,
        now: DateTime<Utc>,
    ) -> Result<RatingSummary, StoreError> {
        let mut state = self.state.lock().await;
        let summary = state.rating_of(agent_id);
        if let Some(agent) = state.agents.get_mut(&agent_id) {
            agent.rating = summary.rating;
            agent.review_count = summary.review_count;
            agent.updated_at = now;
        }
        Ok(summary)
    }
}
