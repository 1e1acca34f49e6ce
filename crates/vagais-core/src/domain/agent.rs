//! Catalog entities: agents and their reviews.
//!
//! `usage_count` / `rating` / `review_count` are derived counters. They are only
//! ever written by the store primitives (`increment_usage`, `recompute_rating`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, OrganizationId, ReviewId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub creator_id: UserId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,

    pub is_public: bool,
    pub is_enabled: bool,

    pub usage_count: u64,

    /// Average review rating, 0 when there are no reviews.
    pub rating: f64,
    pub review_count: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// 実行権限: 作成者本人、または公開エージェント
    pub fn can_run(&self, user: UserId) -> bool {
        self.creator_id == user || self.is_public
    }
}

/// Fields supplied when registering an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub agent_id: AgentId,
    pub user_id: UserId,

    /// 1..=5
    pub rating: u8,
    pub title: String,
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

pub fn rating_in_range(rating: u8) -> bool {
    (MIN_RATING..=MAX_RATING).contains(&rating)
}

/// Aggregate recomputed from the review rows.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RatingSummary {
    pub rating: f64,
    pub review_count: u64,
}

impl RatingSummary {
    pub fn from_ratings(ratings: impl IntoIterator<Item = u8>) -> Self {
        let (sum, count) = ratings
            .into_iter()
            .fold((0u64, 0u64), |(sum, count), r| (sum + u64::from(r), count + 1));
        if count == 0 {
            return Self::default();
        }
        Self {
            rating: sum as f64 / count as f64,
            review_count: count,
        }
    }
}
