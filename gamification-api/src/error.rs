//! Maps `gamification_engine::DomainError` onto HTTP status codes and the
//! `{ "error": "<message>" }` response body, the way `fo3-wallet-api`'s
//! `ApiError` wraps `fo3_wallet::error::Error` with its own
//! `axum::response::IntoResponse` impl.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gamification_engine::DomainError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("{0}")]
    NotFound(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Domain(err) => (status_for(err), err.to_string()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

fn status_for(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
        DomainError::StorageError(_) | DomainError::RetrievalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        DomainError::RuleEvaluationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
