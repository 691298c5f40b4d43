use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("token is required")]
    MissingToken,

    #[error("invalid token format: expected exactly 64 hexadecimal characters")]
    InvalidToken,

    #[error("token already stored")]
    DuplicateToken,

    #[error("token not found")]
    TokenNotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingToken | AppError::InvalidToken => StatusCode::BAD_REQUEST,
            AppError::DuplicateToken => StatusCode::CONFLICT,
            AppError::TokenNotFound => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// (type, code, user-facing message). Storage failures are logged here and
    /// reported to the caller without detail.
    pub fn describe(&self) -> (&'static str, &'static str, String) {
        match self {
            AppError::MissingToken => (
                "invalid_request_error",
                "token_required",
                self.to_string(),
            ),
            AppError::InvalidToken => (
                "invalid_request_error",
                "invalid_token_format",
                self.to_string(),
            ),
            AppError::DuplicateToken => (
                "conflict_error",
                "duplicate_token",
                "duplicate token: this token is already stored".to_string(),
            ),
            AppError::TokenNotFound => (
                "not_found_error",
                "token_not_found",
                self.to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, code, msg) = self.describe();

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
