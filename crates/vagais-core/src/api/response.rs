//! JSON envelope と DispatchError → HTTP status の対応

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::domain::IdParseError;
use crate::error::DispatchError;

/// `{success: true, data}`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<Envelope<T>>) {
    (StatusCode::CREATED, ok(data))
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid X-User-Id header")]
    Unauthenticated,

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Dispatch(err) => match err {
                DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
                DispatchError::Permission(_) => StatusCode::FORBIDDEN,
                DispatchError::InvalidState(_) | DispatchError::Conflict(_) => {
                    StatusCode::CONFLICT
                }
                DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
                DispatchError::Saturated { .. } | DispatchError::ShuttingDown => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                DispatchError::HandlerNotFound(_) | DispatchError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl From<IdParseError> for ApiError {
    fn from(err: IdParseError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // 内部エラーの詳細はログにだけ出す
            error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({"success": false, "error": message}))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
