//! API Error Responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use scheduler::{FilterError, SchedError, SilenceError};
use serde_json::json;
use tracing::error;

/// Handler error mapped onto an HTTP status
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    UnprocessableEntity(String),
    Internal(String),
}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<SilenceError> for ApiError {
    fn from(err: SilenceError) -> Self {
        match err {
            SilenceError::NotFound(_) => ApiError::NotFound(err.to_string()),
            _ => ApiError::UnprocessableEntity(err.to_string()),
        }
    }
}

impl From<SchedError> for ApiError {
    fn from(err: SchedError) -> Self {
        match err {
            SchedError::CheckRunning => ApiError::Conflict(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::UnprocessableEntity(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
            ApiError::Internal(message) => {
                error!("Internal server error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
