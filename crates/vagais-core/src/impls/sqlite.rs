//! SQLite store (RecordStore + CatalogStore) on sqlx.
//!
//! - 時刻は UTC の unix millis（INTEGER）、JSON は TEXT で保存する
//! - 終端遷移 / cancel は条件付き UPDATE。`rows_affected() == 0` なら `false`
//! - usage_count は `usage_count = usage_count + ?`、rating は AVG / COUNT で再計算

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::str::FromStr;
use tracing::{debug, info};

use crate::domain::{
    Agent, AgentId, Outcome, RatingSummary, Record, RecordId, RecordKind, RecordStatus, Review,
    ReviewId, SubjectId, TaskType, Terminal, UserId,
};
use crate::error::StoreError;
use crate::ports::{
    CatalogStore, RecordPage, RecordQuery, RecordStore, ReviewPage, StatsFilter, StatusCounts,
    paging_offset,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        task_type TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        organization_id TEXT,
        subject_id TEXT NOT NULL,
        status TEXT NOT NULL,
        input TEXT NOT NULL,
        output TEXT,
        error TEXT,
        duration_ms INTEGER,
        attempts INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_records_owner ON records(owner_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_records_status ON records(status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_records_subject ON records(kind, subject_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        creator_id TEXT NOT NULL,
        organization_id TEXT,
        is_public INTEGER NOT NULL,
        is_enabled INTEGER NOT NULL,
        usage_count INTEGER NOT NULL DEFAULT 0,
        rating REAL NOT NULL DEFAULT 0,
        review_count INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reviews (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        rating INTEGER NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        response TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (agent_id, user_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_reviews_agent ON reviews(agent_id, created_at DESC)",
];

const RECORD_COLUMNS: &str = "id, kind, task_type, owner_id, organization_id, subject_id, status, \
     input, output, error, duration_ms, attempts, created_at, updated_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create the schema if it is missing.
    ///
    /// URL format: `sqlite://path/to/vagais.db` or `sqlite::memory:`
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        info!(url, "opening sqlite store");
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // :memory: はコネクションごとに別 DB になるので 1 本に固定して使い回す
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    /// Idempotent schema creation.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("sqlite schema ready");
        Ok(())
    }
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn parse_col<T>(row: &SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|err| StoreError::Corrupt(format!("{column}={raw:?}: {err}")))
}

fn parse_opt_col<T>(row: &SqliteRow, column: &str) -> Result<Option<T>, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| {
        raw.parse()
            .map_err(|err| StoreError::Corrupt(format!("{column}={raw:?}: {err}")))
    })
    .transpose()
}

fn to_u64(value: i64, column: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} is negative: {value}")))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn record_from_row(row: &SqliteRow) -> Result<Record, StoreError> {
    let input: String = row.try_get("input")?;
    let output: Option<String> = row.try_get("output")?;
    let duration_ms: Option<i64> = row.try_get("duration_ms")?;
    let attempts: i64 = row.try_get("attempts")?;

    Ok(Record {
        id: parse_col(row, "id")?,
        kind: parse_col::<RecordKind>(row, "kind")?,
        task_type: TaskType::new(row.try_get::<String, _>("task_type")?),
        owner_id: parse_col(row, "owner_id")?,
        organization_id: parse_opt_col(row, "organization_id")?,
        subject_id: SubjectId::new(row.try_get::<String, _>("subject_id")?),
        status: parse_col::<RecordStatus>(row, "status")?,
        input: serde_json::from_str(&input)?,
        output: output.as_deref().map(serde_json::from_str).transpose()?,
        error: row.try_get("error")?,
        duration_ms: duration_ms.map(|d| to_u64(d, "duration_ms")).transpose()?,
        attempts: u32::try_from(attempts)
            .map_err(|_| StoreError::Corrupt(format!("attempts out of range: {attempts}")))?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent, StoreError> {
    Ok(Agent {
        id: parse_col(row, "id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        creator_id: parse_col(row, "creator_id")?,
        organization_id: parse_opt_col(row, "organization_id")?,
        is_public: row.try_get("is_public")?,
        is_enabled: row.try_get("is_enabled")?,
        usage_count: to_u64(row.try_get("usage_count")?, "usage_count")?,
        rating: row.try_get("rating")?,
        review_count: to_u64(row.try_get("review_count")?, "review_count")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn review_from_row(row: &SqliteRow) -> Result<Review, StoreError> {
    let rating: i64 = row.try_get("rating")?;
    Ok(Review {
        id: parse_col(row, "id")?,
        agent_id: parse_col(row, "agent_id")?,
        user_id: parse_col(row, "user_id")?,
        rating: u8::try_from(rating)
            .map_err(|_| StoreError::Corrupt(format!("rating out of range: {rating}")))?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        response: row.try_get("response")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(&self, record: &Record) -> Result<(), StoreError> {
        let output = record.output.as_ref().map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            r#"
            INSERT INTO records (id, kind, task_type, owner_id, organization_id, subject_id,
                status, input, output, error, duration_ms, attempts, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.kind.as_str())
        .bind(record.task_type.as_str())
        .bind(record.owner_id.to_string())
        .bind(record.organization_id.map(|o| o.to_string()))
        .bind(record.subject_id.as_str())
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.input)?)
        .bind(output)
        .bind(record.error.as_deref())
        .bind(record.duration_ms.map(to_i64))
        .bind(i64::from(record.attempts))
        .bind(millis(record.created_at))
        .bind(millis(record.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Duplicate(format!("record {}", record.id)))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, id: RecordId) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn finish(
        &self,
        id: RecordId,
        terminal: &Terminal,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let (output, error) = match &terminal.outcome {
            Outcome::Completed { output } => (Some(serde_json::to_string(output)?), None),
            Outcome::Failed { error } => (None, Some(error.as_str())),
            Outcome::Cancelled => (None, None),
        };
        let result = sqlx::query(
            r#"
            UPDATE records
            SET status = ?, output = ?, error = ?, duration_ms = ?, attempts = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(terminal.outcome.status().as_str())
        .bind(output)
        .bind(error)
        .bind(to_i64(terminal.duration_ms))
        .bind(i64::from(terminal.attempts))
        .bind(millis(now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel(&self, id: RecordId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let now = millis(now);
        let result = sqlx::query(
            r#"
            UPDATE records
            SET status = 'cancelled', duration_ms = MAX(? - created_at, 0), updated_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, query: &RecordQuery) -> Result<RecordPage, StoreError> {
        // フィルタは NULL なら無効（同じ値を 2 回 bind する）
        const FILTER: &str = "owner_id = ? \
             AND (? IS NULL OR kind = ?) \
             AND (? IS NULL OR status = ?) \
             AND (? IS NULL OR subject_id = ?)";

        let owner = query.owner_id.to_string();
        let kind = query.kind.map(RecordKind::as_str);
        let status = query.status.map(RecordStatus::as_str);
        let subject = query.subject_id.as_ref().map(SubjectId::as_str);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM records WHERE {FILTER}"))
            .bind(&owner)
            .bind(kind)
            .bind(kind)
            .bind(status)
            .bind(status)
            .bind(subject)
            .bind(subject)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE {FILTER} \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        ))
        .bind(&owner)
        .bind(kind)
        .bind(kind)
        .bind(status)
        .bind(status)
        .bind(subject)
        .bind(subject)
        .bind(i64::from(query.limit))
        .bind(to_i64(query.offset()))
        .fetch_all(&self.pool)
        .await?;

        Ok(RecordPage {
            items: rows.iter().map(record_from_row).collect::<Result<_, _>>()?,
            total: to_u64(total, "total")?,
            page: query.page,
            limit: query.limit,
        })
    }

    async fn counts(&self, filter: &StatsFilter) -> Result<StatusCounts, StoreError> {
        const FILTER: &str = "(? IS NULL OR owner_id = ?) \
             AND (? IS NULL OR kind = ?) \
             AND (? IS NULL OR subject_id = ?) \
             AND (? IS NULL OR created_at >= ?)";

        let owner = filter.owner_id.map(|id| id.to_string());
        let kind = filter.kind.map(RecordKind::as_str);
        let subject = filter.subject_id.as_ref().map(SubjectId::as_str);
        let since = filter.since.map(millis);

        let rows = sqlx::query(&format!(
            "SELECT status, COUNT(*) AS n FROM records WHERE {FILTER} GROUP BY status"
        ))
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .bind(kind)
        .bind(kind)
        .bind(subject)
        .bind(subject)
        .bind(since)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for row in &rows {
            let status = parse_col::<RecordStatus>(row, "status")?;
            counts.add(status, to_u64(row.try_get("n")?, "n")?);
        }
        counts.avg_duration_ms = sqlx::query_scalar(&format!(
            "SELECT AVG(duration_ms) FROM records WHERE {FILTER} AND status = 'completed'"
        ))
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .bind(kind)
        .bind(kind)
        .bind(subject)
        .bind(subject)
        .bind(since)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn list_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records \
             WHERE status IN ('pending', 'running') AND created_at < ? \
             ORDER BY created_at ASC, id ASC LIMIT ?"
        ))
        .bind(millis(older_than))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM records \
             WHERE status IN ('completed', 'failed', 'cancelled') AND updated_at < ?",
        )
        .bind(millis(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn insert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO agents (id, name, description, creator_id, organization_id, is_public,
                is_enabled, usage_count, rating, review_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(agent.id.to_string())
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(agent.creator_id.to_string())
        .bind(agent.organization_id.map(|o| o.to_string()))
        .bind(agent.is_public)
        .bind(agent.is_enabled)
        .bind(to_i64(agent.usage_count))
        .bind(agent.rating)
        .bind(to_i64(agent.review_count))
        .bind(millis(agent.created_at))
        .bind(millis(agent.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Duplicate(format!("agent {}", agent.id)))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(agent_from_row).transpose()
    }

    async fn set_agent_enabled(
        &self,
        id: AgentId,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE agents SET is_enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(millis(now))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_usage(&self, id: AgentId, by: u64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE agents SET usage_count = usage_count + ? WHERE id = ?")
            .bind(to_i64(by))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_review(&self, review: &Review) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO reviews (id, agent_id, user_id, rating, title, content, response,
                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(review.id.to_string())
        .bind(review.agent_id.to_string())
        .bind(review.user_id.to_string())
        .bind(i64::from(review.rating))
        .bind(&review.title)
        .bind(&review.content)
        .bind(review.response.as_deref())
        .bind(millis(review.created_at))
        .bind(millis(review.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate(format!(
                "review by {} for {}",
                review.user_id, review.agent_id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_review(&self, id: ReviewId) -> Result<Option<Review>, StoreError> {
        let row = sqlx::query("SELECT * FROM reviews WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(review_from_row).transpose()
    }

    async fn find_review(
        &self,
        agent_id: AgentId,
        user_id: UserId,
    ) -> Result<Option<Review>, StoreError> {
        let row = sqlx::query("SELECT * FROM reviews WHERE agent_id = ? AND user_id = ?")
            .bind(agent_id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(review_from_row).transpose()
    }

    async fn update_review(&self, review: &Review) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE reviews SET rating = ?, title = ?, content = ?, response = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(i64::from(review.rating))
        .bind(&review.title)
        .bind(&review.content)
        .bind(review.response.as_deref())
        .bind(millis(review.updated_at))
        .bind(review.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_reviews(
        &self,
        agent_id: AgentId,
        page: u32,
        limit: u32,
    ) -> Result<ReviewPage, StoreError> {
        let agent = agent_id.to_string();
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE agent_id = ?")
            .bind(&agent)
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query(
            "SELECT * FROM reviews WHERE agent_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(&agent)
        .bind(i64::from(limit))
        .bind(to_i64(paging_offset(page, limit)))
        .fetch_all(&self.pool)
        .await?;

        Ok(ReviewPage {
            items: rows.iter().map(review_from_row).collect::<Result<_, _>>()?,
            total: to_u64(total, "total")?,
            page,
            limit,
        })
    }

    async fn delete_review(&self, id: ReviewId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recompute_rating(
        &self,
        agent_id: AgentId,
        now: DateTime<Utc>,
    ) -> Result<RatingSummary, StoreError> {
        let agent = agent_id.to_string();
        // 集計と書き込みを 1 文で行う
        sqlx::query(
            r#"
            UPDATE agents
            SET rating = COALESCE((SELECT AVG(rating) FROM reviews WHERE agent_id = ?1), 0),
                review_count = (SELECT COUNT(*) FROM reviews WHERE agent_id = ?1),
                updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(&agent)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT COALESCE(AVG(rating), 0.0) AS rating, COUNT(*) AS n \
             FROM reviews WHERE agent_id = ?",
        )
        .bind(&agent)
        .fetch_one(&self.pool)
        .await?;
        Ok(RatingSummary {
            rating: row.try_get("rating")?,
            review_count: to_u64(row.try_get("n")?, "n")?,
        })
    }
}
