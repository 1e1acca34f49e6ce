use thiserror::Error;

use crate::domain::{RecordStatus, TaskTypeError};

/// Errors surfaced synchronously to callers of the runtime and catalog.
///
/// Background failures never become a `DispatchError`; they are written to
/// the record instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("dispatcher saturated: queue capacity {capacity} reached")]
    Saturated { capacity: usize },

    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error("handler not found for task_type={0}")]
    HandlerNotFound(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl DispatchError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        DispatchError::NotFound(what.to_string())
    }

    pub fn not_active(status: RecordStatus) -> Self {
        DispatchError::InvalidState(format!("record is {status}"))
    }
}

impl From<TaskTypeError> for DispatchError {
    fn from(err: TaskTypeError) -> Self {
        DispatchError::Validation(err.to_string())
    }
}

/// Errors from the storage ports.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("duplicate: {0}")]
    Duplicate(String),
}
