//! Events - ドメインイベント
//!
//! 終端遷移ごとに 1 件発行され、publisher_loop が EventSink（webhook）へ届ける。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::Record;
use super::state::RecordStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "record.completed")]
    RecordCompleted,
    #[serde(rename = "record.failed")]
    RecordFailed,
    #[serde(rename = "record.cancelled")]
    RecordCancelled,
}

impl EventKind {
    /// 終端 status に対応するイベント種別（非終端なら None）
    pub fn for_status(status: RecordStatus) -> Option<Self> {
        match status {
            RecordStatus::Completed => Some(EventKind::RecordCompleted),
            RecordStatus::Failed => Some(EventKind::RecordFailed),
            RecordStatus::Cancelled => Some(EventKind::RecordCancelled),
            RecordStatus::Pending | RecordStatus::Running => None,
        }
    }
}

/// DomainEvent は webhook に送る `{event, timestamp, data}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: Record,
}

impl DomainEvent {
    /// 終端状態の Record からイベントを作る
    pub fn terminal(record: Record, timestamp: DateTime<Utc>) -> Option<Self> {
        let event = EventKind::for_status(record.status)?;
        Some(Self {
            event,
            timestamp,
            data: record,
        })
    }
}
