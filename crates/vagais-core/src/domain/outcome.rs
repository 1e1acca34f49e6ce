//! Outcome model: what the terminal write of a record carries.

use serde::{Deserialize, Serialize};

use super::state::RecordStatus;

/// The result of background work, as it will be written to the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Completed { output: serde_json::Value },
    Failed { error: String },
    Cancelled,
}

/// Error text for a failure that carried no message.
pub const UNSPECIFIED_FAILURE: &str = "task failed";

/// Error text for work that finished without producing anything.
pub const MISSING_OUTPUT: &str = "task returned no output";

impl Outcome {
    /// A `null` output is not a result: it becomes a failure so that a
    /// completed record always has an output.
    pub fn completed(output: serde_json::Value) -> Self {
        if output.is_null() {
            return Outcome::failed(MISSING_OUTPUT);
        }
        Outcome::Completed { output }
    }

    /// Blank messages are replaced with [`UNSPECIFIED_FAILURE`].
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            UNSPECIFIED_FAILURE.to_string()
        } else {
            error
        };
        Outcome::Failed { error }
    }

    /// The status this outcome moves the record into.
    pub fn status(&self) -> RecordStatus {
        match self {
            Outcome::Completed { .. } => RecordStatus::Completed,
            Outcome::Failed { .. } => RecordStatus::Failed,
            Outcome::Cancelled => RecordStatus::Cancelled,
        }
    }
}

/// Terminal write: the outcome plus the bookkeeping that is written with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Terminal {
    pub outcome: Outcome,

    /// Elapsed processing time in milliseconds.
    pub duration_ms: u64,

    /// Number of task attempts performed (0 when cancelled before pickup).
    pub attempts: u32,
}

impl Terminal {
    pub fn new(outcome: Outcome, duration_ms: u64, attempts: u32) -> Self {
        Self {
            outcome,
            duration_ms,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("\n")]
    fn blank_failures_get_a_message(#[case] message: &str) {
        assert_eq!(
            Outcome::failed(message),
            Outcome::Failed {
                error: UNSPECIFIED_FAILURE.to_string()
            }
        );
    }

    #[test]
    fn failure_message_is_kept() {
        assert_eq!(
            Outcome::failed("card declined"),
            Outcome::Failed {
                error: "card declined".to_string()
            }
        );
    }

    #[test]
    fn null_output_is_a_failure() {
        let outcome = Outcome::completed(serde_json::Value::Null);
        assert_eq!(outcome.status(), RecordStatus::Failed);
        assert_eq!(
            outcome,
            Outcome::Failed {
                error: MISSING_OUTPUT.to_string()
            }
        );

        // 空オブジェクトは出力として扱う
        assert_eq!(Outcome::completed(json!({})).status(), RecordStatus::Completed);
    }
}
