//! PayloadCodec - Record.input と Task の相互変換

use super::task::Task;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode {task_type}: {source}")]
    Encode {
        task_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("decode {task_type}: {source}")]
    Decode {
        task_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// PayloadCodec は Task <-> JSON 値の変換を一か所にまとめる
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Task>(task: &T) -> Result<serde_json::Value, CodecError> {
        serde_json::to_value(task).map_err(|source| CodecError::Encode {
            task_type: T::TYPE,
            source,
        })
    }

    pub fn decode<T: Task>(payload: serde_json::Value) -> Result<T, CodecError> {
        serde_json::from_value(payload).map_err(|source| CodecError::Decode {
            task_type: T::TYPE,
            source,
        })
    }
}
