//! Catalog - agent 登録とレビュー
//!
//! レビューの作成・更新・削除のたびに rating / review_count を
//! レビュー集合から再計算する（差分更新はしない）。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::agent::rating_in_range;
use crate::domain::{Actor, Agent, AgentId, NewAgent, Review, ReviewId};
use crate::error::{DispatchError, StoreError};
use crate::ports::{CatalogStore, Clock, IdGenerator, ReviewPage, clamp_paging};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewInput {
    pub rating: u8,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

impl ReviewInput {
    fn validate(&self) -> Result<(), DispatchError> {
        if !rating_in_range(self.rating) {
            return Err(DispatchError::Validation(
                "rating must be between 1 and 5".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct Catalog {
    store: Arc<dyn CatalogStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Catalog {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, ids, clock }
    }

    pub async fn register_agent(
        &self,
        actor: &Actor,
        new: NewAgent,
    ) -> Result<Agent, DispatchError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(DispatchError::Validation("agent name is required".to_string()));
        }
        let now = self.clock.now();
        let agent = Agent {
            id: self.ids.generate_agent_id(),
            name: name.to_string(),
            description: new.description,
            creator_id: actor.user_id,
            organization_id: actor.organization_id,
            is_public: new.is_public,
            is_enabled: new.is_enabled,
            usage_count: 0,
            rating: 0.0,
            review_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_agent(&agent).await?;
        info!(agent_id = %agent.id, creator_id = %agent.creator_id, "agent registered");
        Ok(agent)
    }

    pub async fn get_agent(&self, id: AgentId) -> Result<Agent, DispatchError> {
        self.store
            .get_agent(id)
            .await?
            .ok_or_else(|| DispatchError::not_found(format!("agent {id}")))
    }

    /// Creator only.
    pub async fn set_agent_enabled(
        &self,
        actor: &Actor,
        id: AgentId,
        enabled: bool,
    ) -> Result<Agent, DispatchError> {
        let agent = self.get_agent(id).await?;
        if agent.creator_id != actor.user_id {
            return Err(DispatchError::Permission(
                "only the creator can change an agent".to_string(),
            ));
        }
        if !self.store.set_agent_enabled(id, enabled, self.clock.now()).await? {
            return Err(DispatchError::not_found(format!("agent {id}")));
        }
        self.get_agent(id).await
    }

    /// One review per (agent, user).
    pub async fn create_review(
        &self,
        actor: &Actor,
        agent_id: AgentId,
        input: ReviewInput,
    ) -> Result<Review, DispatchError> {
        input.validate()?;
        self.get_agent(agent_id).await?;
        if self
            .store
            .find_review(agent_id, actor.user_id)
            .await?
            .is_some()
        {
            return Err(already_reviewed());
        }

        let now = self.clock.now();
        let review = Review {
            id: self.ids.generate_review_id(),
            agent_id,
            user_id: actor.user_id,
            rating: input.rating,
            title: input.title,
            content: input.content,
            response: None,
            created_at: now,
            updated_at: now,
        };
        // find_review と insert の間に割り込まれたら unique 制約で弾かれる
        self.store.insert_review(&review).await.map_err(|err| match err {
            StoreError::Duplicate(_) => already_reviewed(),
            other => other.into(),
        })?;

        let summary = self.store.recompute_rating(agent_id, now).await?;
        info!(
            review_id = %review.id,
            agent_id = %agent_id,
            rating = summary.rating,
            review_count = summary.review_count,
            "review created"
        );
        Ok(review)
    }

    /// Author only.
    pub async fn update_review(
        &self,
        actor: &Actor,
        id: ReviewId,
        input: ReviewInput,
    ) -> Result<Review, DispatchError> {
        input.validate()?;
        let mut review = self.owned_review(actor, id).await?;

        let now = self.clock.now();
        review.rating = input.rating;
        review.title = input.title;
        review.content = input.content;
        review.updated_at = now;
        if !self.store.update_review(&review).await? {
            return Err(DispatchError::not_found(format!("review {id}")));
        }

        self.store.recompute_rating(review.agent_id, now).await?;
        Ok(review)
    }

    /// Agent creator only. Replaces any earlier response; the rating is untouched.
    pub async fn respond_to_review(
        &self,
        actor: &Actor,
        id: ReviewId,
        response: String,
    ) -> Result<Review, DispatchError> {
        let response = response.trim();
        if response.is_empty() {
            return Err(DispatchError::Validation("response is required".to_string()));
        }
        let mut review = self
            .store
            .get_review(id)
            .await?
            .ok_or_else(|| DispatchError::not_found(format!("review {id}")))?;
        let agent = self.get_agent(review.agent_id).await?;
        if agent.creator_id != actor.user_id {
            return Err(DispatchError::Permission(
                "only the agent creator can respond to a review".to_string(),
            ));
        }

        review.response = Some(response.to_string());
        review.updated_at = self.clock.now();
        if !self.store.update_review(&review).await? {
            return Err(DispatchError::not_found(format!("review {id}")));
        }
        info!(review_id = %id, agent_id = %review.agent_id, "review answered");
        Ok(review)
    }

    /// Newest first.
    pub async fn list_reviews(
        &self,
        agent_id: AgentId,
        page: u32,
        limit: u32,
    ) -> Result<ReviewPage, DispatchError> {
        self.get_agent(agent_id).await?;
        let (page, limit) = clamp_paging(page, limit);
        Ok(self.store.list_reviews(agent_id, page, limit).await?)
    }

    /// Author only.
    pub async fn delete_review(&self, actor: &Actor, id: ReviewId) -> Result<(), DispatchError> {
        let review = self.owned_review(actor, id).await?;
        if !self.store.delete_review(id).await? {
            return Err(DispatchError::not_found(format!("review {id}")));
        }
        self.store
            .recompute_rating(review.agent_id, self.clock.now())
            .await?;
        info!(review_id = %id, agent_id = %review.agent_id, "review deleted");
        Ok(())
    }

    async fn owned_review(&self, actor: &Actor, id: ReviewId) -> Result<Review, DispatchError> {
        let review = self
            .store
            .get_review(id)
            .await?
            .ok_or_else(|| DispatchError::not_found(format!("review {id}")))?;
        if review.user_id != actor.user_id {
            return Err(DispatchError::Permission(
                "only the author can change a review".to_string(),
            ));
        }
        Ok(review)
    }
}

fn already_reviewed() -> DispatchError {
    DispatchError::Conflict("user has already reviewed this agent".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserId;
    use crate::impls::InMemoryStore;
    use crate::ports::{SystemClock, UlidGenerator};
    use ulid::Ulid;

    fn catalog() -> Catalog {
        Catalog::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        )
    }

    fn actor() -> Actor {
        Actor::new(UserId::from_ulid(Ulid::new()))
    }

    fn new_agent(name: &str) -> NewAgent {
        NewAgent {
            name: name.to_string(),
            description: String::new(),
            is_public: true,
            is_enabled: true,
        }
    }

    fn stars(rating: u8) -> ReviewInput {
        ReviewInput {
            rating,
            title: "t".to_string(),
            content: "c".to_string(),
        }
    }

    #[tokio::test]
    async fn rating_follows_review_set() {
        let catalog = catalog();
        let creator = actor();
        let agent = catalog
            .register_agent(&creator, new_agent("summarizer"))
            .await
            .unwrap();

        let (alice, bob) = (actor(), actor());
        catalog.create_review(&alice, agent.id, stars(4)).await.unwrap();
        let bobs = catalog.create_review(&bob, agent.id, stars(5)).await.unwrap();

        let snapshot = catalog.get_agent(agent.id).await.unwrap();
        assert_eq!(snapshot.rating, 4.5);
        assert_eq!(snapshot.review_count, 2);

        catalog
            .update_review(&bob, bobs.id, stars(2))
            .await
            .unwrap();
        let snapshot = catalog.get_agent(agent.id).await.unwrap();
        assert_eq!(snapshot.rating, 3.0);

        catalog.delete_review(&bob, bobs.id).await.unwrap();
        let snapshot = catalog.get_agent(agent.id).await.unwrap();
        assert_eq!(snapshot.rating, 4.0);
        assert_eq!(snapshot.review_count, 1);
    }

    #[tokio::test]
    async fn second_review_by_same_user_conflicts() {
        let catalog = catalog();
        let agent = catalog.register_agent(&actor(), new_agent("a")).await.unwrap();
        let reviewer = actor();

        catalog.create_review(&reviewer, agent.id, stars(3)).await.unwrap();
        let err = catalog
            .create_review(&reviewer, agent.id, stars(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    #[tokio::test]
    async fn review_validation_and_ownership() {
        let catalog = catalog();
        let agent = catalog.register_agent(&actor(), new_agent("a")).await.unwrap();
        let author = actor();

        let err = catalog
            .create_review(&author, agent.id, stars(6))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        let review = catalog.create_review(&author, agent.id, stars(3)).await.unwrap();
        let err = catalog
            .delete_review(&actor(), review.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Permission(_)));

        let missing = AgentId::from_ulid(Ulid::new());
        let err = catalog
            .create_review(&author, missing, stars(3))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn only_creator_toggles_enabled() {
        let catalog = catalog();
        let creator = actor();
        let agent = catalog.register_agent(&creator, new_agent("a")).await.unwrap();

        let err = catalog
            .set_agent_enabled(&actor(), agent.id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Permission(_)));

        let disabled = catalog
            .set_agent_enabled(&creator, agent.id, false)
            .await
            .unwrap();
        assert!(!disabled.is_enabled);
    }

    #[tokio::test]
    async fn reviews_list_newest_first_with_paging() {
        let catalog = catalog();
        let agent = catalog.register_agent(&actor(), new_agent("a")).await.unwrap();

        let mut ids = Vec::new();
        for rating in [1, 2, 3] {
            ids.push(catalog.create_review(&actor(), agent.id, stars(rating)).await.unwrap().id);
            // created_at が同じ millis にならないように
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let page = catalog.list_reviews(agent.id, 1, 2).await.unwrap();
        assert_eq!((page.total, page.page, page.limit), (3, 1, 2));
        assert_eq!(
            page.items.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![ids[2], ids[1]]
        );

        // 0 は既定値に丸める
        let page = catalog.list_reviews(agent.id, 0, 0).await.unwrap();
        assert_eq!((page.page, page.limit), (1, crate::ports::record_store::DEFAULT_PAGE_LIMIT));
        assert_eq!(page.items.len(), 3);

        let err = catalog
            .list_reviews(AgentId::from_ulid(Ulid::new()), 1, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn only_the_agent_creator_responds() {
        let catalog = catalog();
        let creator = actor();
        let agent = catalog.register_agent(&creator, new_agent("a")).await.unwrap();
        let author = actor();
        let review = catalog.create_review(&author, agent.id, stars(2)).await.unwrap();

        let err = catalog
            .respond_to_review(&author, review.id, "thanks".into())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Permission(_)));
        let err = catalog
            .respond_to_review(&creator, review.id, "  ".into())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        let answered = catalog
            .respond_to_review(&creator, review.id, " fixed in v2 ".into())
            .await
            .unwrap();
        assert_eq!(answered.response.as_deref(), Some("fixed in v2"));

        let page = catalog.list_reviews(agent.id, 1, 10).await.unwrap();
        assert_eq!(page.items[0].response.as_deref(), Some("fixed in v2"));
        // 返信は rating を変えない
        assert_eq!(catalog.get_agent(agent.id).await.unwrap().rating, 2.0);
    }
}
