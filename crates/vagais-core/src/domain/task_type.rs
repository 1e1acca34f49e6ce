//! TaskType - task_type 命名規約のサポート
//!
//! # 命名規約
//! - `{namespace}.{domain}.{action}.v{major}`
//! - 例: `vagais.payment.charge.v1`

use serde::{Deserialize, Serialize};
use std::fmt;

/// TaskType は Record をどの Handler で処理するかを表す
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskTypeError {
    #[error("task_type {0:?} must look like namespace.domain.action.vN")]
    Malformed(String),
}

impl TaskType {
    /// Build a task type without validation (trusted constants, store rows).
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Build a task type, checking the naming convention.
    pub fn parse(s: &str) -> Result<Self, TaskTypeError> {
        Self::validate(s)?;
        Ok(Self(s.to_string()))
    }

    pub fn validate(s: &str) -> Result<(), TaskTypeError> {
        let malformed = || TaskTypeError::Malformed(s.to_string());
        let segments: Vec<&str> = s.split('.').collect();
        if segments.len() != 4 {
            return Err(malformed());
        }

        let (name, version) = segments.split_at(3);
        let name_ok = name.iter().all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        });
        let version_ok = version[0]
            .strip_prefix('v')
            .is_some_and(|major| !major.is_empty() && major.chars().all(|c| c.is_ascii_digit()));

        if name_ok && version_ok {
            Ok(())
        } else {
            Err(malformed())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
