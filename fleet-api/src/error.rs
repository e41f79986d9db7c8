//! Maps internal errors onto the taxonomy of spec §7 at the HTTP
//! boundary. Grounded on `hr-auth`'s convention of returning
//! `(StatusCode, Json<Value>)` tuples directly from handlers rather
//! than a shared `IntoResponse` error type — kept here as a thin enum
//! anyway because `fleet-api` has more call sites sharing the same
//! mapping than any single `hr-api` route module does.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use fleet_store::StoreError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("too many failed attempts")]
    TooManyAttempts,
    #[error("rate limited")]
    RateLimited,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("internal error")]
    Internal,
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::InvalidCode => ApiError::BadRequest("Invalid or expired code.".into()),
            StoreError::TooManyAttempts => ApiError::TooManyAttempts,
            StoreError::NotPending => ApiError::BadRequest("agent is not pending".into()),
            StoreError::Db(err) => {
                tracing::error!(%err, "store error");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::TooManyAttempts => (
                StatusCode::BAD_REQUEST,
                "Too many failed attempts. Please try again.".to_string(),
            ),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate limited".to_string()),
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
