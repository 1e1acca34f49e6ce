//! Errors - タスク実行エラーと分類

use std::fmt;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨。provider 5xx, タイムアウトなど）
/// - Permanent: 恒久的なエラー（リトライ無意味。入力不正、カード拒否など）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
}

/// TaskError は Handler が返すエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    kind: ErrorKind,
    message: String,
}

impl TaskError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// Why the dispatcher gave up on a record.
///
/// The `Display` form is what lands in `Record::error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    /// Deadline expired.
    Timeout { after_ms: u64 },

    /// Handler returned an error (after retries, if any).
    Task(TaskError),

    /// Handler panicked.
    Panicked(String),

    /// Record sat non-terminal longer than the reaper allows.
    Abandoned { stale_ms: u64 },
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Timeout { after_ms } => {
                write!(f, "TimeoutError: task exceeded deadline of {after_ms}ms")
            }
            TaskFailure::Task(err) => f.write_str(err.message()),
            TaskFailure::Panicked(msg) => write!(f, "task panicked: {msg}"),
            TaskFailure::Abandoned { stale_ms } => write!(
                f,
                "TimeoutError: abandoned, no terminal state after {stale_ms}ms"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(TaskError::transient("provider 503").is_retryable());
        assert!(!TaskError::permanent("card declined").is_retryable());
    }

    #[test]
    fn timeout_message_names_the_error() {
        let msg = TaskFailure::Timeout { after_ms: 30_000 }.to_string();
        assert!(msg.starts_with("TimeoutError"));
        assert!(msg.contains("30000ms"));
    }
}
