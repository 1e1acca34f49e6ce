//! RecordStore port - Record の正本（source of truth）
//!
//! # 設計原則
//! - 終端遷移は条件付き更新（`WHERE status IN ('pending','running')`）
//!   二重書き込みは `Ok(false)` になり、呼び出し側はログだけ出して無視する
//! - cancel は `WHERE status = 'running'` の条件付き更新
//! - 一覧は新しい順（created_at DESC, id DESC）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Record, RecordId, RecordKind, RecordStatus, SubjectId, Terminal, UserId};
use crate::error::StoreError;

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// 一覧の絞り込み条件（owner は必須）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub owner_id: UserId,
    pub kind: Option<RecordKind>,
    pub status: Option<RecordStatus>,
    pub subject_id: Option<SubjectId>,
    /// 1 始まり
    pub page: u32,
    pub limit: u32,
}

impl RecordQuery {
    pub fn for_owner(owner_id: UserId) -> Self {
        Self {
            owner_id,
            kind: None,
            status: None,
            subject_id: None,
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }

    /// page / limit を有効範囲に丸める
    pub fn normalized(mut self) -> Self {
        (self.page, self.limit) = clamp_paging(self.page, self.limit);
        self
    }

    pub fn offset(&self) -> u64 {
        paging_offset(self.page, self.limit)
    }

    /// Whether `record` passes every filter of this query.
    pub fn matches(&self, record: &Record) -> bool {
        record.owner_id == self.owner_id
            && self.kind.is_none_or(|kind| record.kind == kind)
            && self.status.is_none_or(|status| record.status == status)
            && self
                .subject_id
                .as_ref()
                .is_none_or(|subject| &record.subject_id == subject)
    }
}

/// page は 1 以上、limit は 0 なら既定値、上限は MAX_PAGE_LIMIT
pub fn clamp_paging(page: u32, limit: u32) -> (u32, u32) {
    let limit = match limit {
        0 => DEFAULT_PAGE_LIMIT,
        n => n.min(MAX_PAGE_LIMIT),
    };
    (page.max(1), limit)
}

pub fn paging_offset(page: u32, limit: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(limit)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    pub items: Vec<Record>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// 集計の対象。`None` の条件では絞り込まない
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsFilter {
    pub owner_id: Option<UserId>,
    pub kind: Option<RecordKind>,
    pub subject_id: Option<SubjectId>,
    /// `created_at >= since` だけを数える
    pub since: Option<DateTime<Utc>>,
}

impl StatsFilter {
    pub fn for_owner(owner_id: UserId) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Self::default()
        }
    }

    /// Records of `kind` about one subject, whoever owns them.
    pub fn for_subject(kind: RecordKind, subject_id: SubjectId) -> Self {
        Self {
            kind: Some(kind),
            subject_id: Some(subject_id),
            ..Self::default()
        }
    }

    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.owner_id.is_none_or(|owner| record.owner_id == owner)
            && self.kind.is_none_or(|kind| record.kind == kind)
            && self
                .subject_id
                .as_ref()
                .is_none_or(|subject| &record.subject_id == subject)
            && self.since.is_none_or(|since| record.created_at >= since)
    }
}

/// Raw per-status counts for the records a [`StatsFilter`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,

    /// Average `duration_ms` over completed records.
    pub avg_duration_ms: Option<f64>,
}

impl StatusCounts {
    pub fn add(&mut self, status: RecordStatus, n: u64) {
        match status {
            RecordStatus::Pending => self.pending += n,
            RecordStatus::Running => self.running += n,
            RecordStatus::Completed => self.completed += n,
            RecordStatus::Failed => self.failed += n,
            RecordStatus::Cancelled => self.cancelled += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 初期状態の Record を保存（creation write）
    async fn insert(&self, record: &Record) -> Result<(), StoreError>;

    async fn get(&self, id: RecordId) -> Result<Option<Record>, StoreError>;

    /// 終端遷移（terminal write）
    ///
    /// Record がまだ pending/running の場合だけ適用し `true` を返す。
    /// 既に終端なら何も変えずに `false`。
    async fn finish(
        &self,
        id: RecordId,
        terminal: &Terminal,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `running -> cancelled`。running でなければ何も変えずに `false`。
    async fn cancel(&self, id: RecordId, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn list(&self, query: &RecordQuery) -> Result<RecordPage, StoreError>;

    async fn counts(&self, filter: &StatsFilter) -> Result<StatusCounts, StoreError>;

    /// `created_at < older_than` でまだ終端に達していない Record（古い順）
    async fn list_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError>;

    /// `updated_at < cutoff` の終端 Record を削除し、削除件数を返す
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
