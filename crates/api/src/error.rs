use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<index::StoreError> for ApiError {
    fn from(err: index::StoreError) -> Self {
        match err {
            index::StoreError::NotFound(id) => ApiError::NotFound(format!("Graph not found: {id}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<index::PersistenceError> for ApiError {
    fn from(err: index::PersistenceError) -> Self {
        match err {
            index::PersistenceError::Statement { .. } => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<query::QueryError> for ApiError {
    fn from(err: query::QueryError) -> Self {
        match err {
            query::QueryError::Transport(e) => ApiError::Unavailable(e.to_string()),
            query::QueryError::Store(e) => e.into(),
        }
    }
}
