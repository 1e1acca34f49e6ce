//! Record: the persisted unit of asynchronous work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{OrganizationId, RecordId, UserId};
use super::outcome::{Outcome, Terminal};
use super::state::RecordStatus;
use super::task_type::TaskType;

/// What kind of business operation a record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Execution,
    Payment,
    Refund,
    Notification,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Execution,
        RecordKind::Payment,
        RecordKind::Refund,
        RecordKind::Notification,
    ];

    /// Executions start `running`; provider-backed work starts `pending`.
    pub fn initial_status(self) -> RecordStatus {
        match self {
            RecordKind::Execution => RecordStatus::Running,
            RecordKind::Payment | RecordKind::Refund | RecordKind::Notification => {
                RecordStatus::Pending
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Execution => "execution",
            RecordKind::Payment => "payment",
            RecordKind::Refund => "refund",
            RecordKind::Notification => "notification",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown record kind: {0:?}")]
pub struct UnknownKind(pub String);

impl FromStr for RecordKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// The entity a record acts upon (agent id, payment provider, original payment,
/// notification channel). Opaque to the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RecordStatus,
    pub to: RecordStatus,
}

/// Everything the caller decides about a record before it exists.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub kind: RecordKind,
    pub task_type: TaskType,
    pub owner_id: UserId,
    pub organization_id: Option<OrganizationId>,
    pub subject_id: SubjectId,
    pub input: serde_json::Value,
}

/// A record and its lifecycle fields.
///
/// Design:
/// - This is the "single source of truth" for a unit of background work.
/// - All state transitions happen here; stores only decide *whether* to apply
///   them (the conditional "still active" check).
/// - `output` is set iff `status == Completed`, `error` iff `status == Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub kind: RecordKind,
    pub task_type: TaskType,
    pub owner_id: UserId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,

    pub subject_id: SubjectId,
    pub status: RecordStatus,

    /// Caller supplied payload; immutable.
    pub input: serde_json::Value,

    pub output: Option<serde_json::Value>,
    pub error: Option<String>,

    /// Processing time in milliseconds; set on the terminal transition.
    pub duration_ms: Option<u64>,

    /// Number of task attempts; written with the terminal transition.
    pub attempts: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(id: RecordId, new: NewRecord, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: new.kind,
            task_type: new.task_type,
            owner_id: new.owner_id,
            organization_id: new.organization_id,
            subject_id: new.subject_id,
            status: new.kind.initial_status(),
            input: new.input,
            output: None,
            error: None,
            duration_ms: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply the dispatcher's terminal write.
    pub fn finish(&mut self, terminal: &Terminal, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(terminal.outcome.status())?;
        match &terminal.outcome {
            Outcome::Completed { output } => self.output = Some(output.clone()),
            Outcome::Failed { error } => self.error = Some(error.clone()),
            Outcome::Cancelled => {}
        }
        self.duration_ms = Some(terminal.duration_ms);
        self.attempts = terminal.attempts;
        self.updated_at = now;
        Ok(())
    }

    /// Owner requested cancellation (`Running -> Cancelled`).
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(RecordStatus::Cancelled)?;
        self.duration_ms = Some(elapsed_ms(self.created_at, now));
        self.updated_at = now;
        Ok(())
    }

    fn transition(&mut self, to: RecordStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Milliseconds between two instants, clamped at zero.
pub fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}
