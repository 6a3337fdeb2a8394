//! Error taxonomy shared by the credential store, the authenticator and the
//! chat layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad input. Raised before any store access.
    #[error("{0}")]
    Validation(String),

    /// Uniqueness violation on username or email.
    #[error("{0}")]
    Conflict(String),

    /// Connection or transport failure talking to the database. The source
    /// is kept for logs and never rendered.
    #[error("User store unavailable")]
    StoreUnavailable(#[source] sqlx::Error),

    /// Failure reported by the completion provider.
    #[error("{0}")]
    RemoteService(String),

    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound,
            other => AppError::StoreUnavailable(other),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RemoteService(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            Self::StoreUnavailable(source) => {
                tracing::error!(error = %source, "user store unavailable");
                self.to_string()
            }
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                "Internal server error".to_string()
            }
            Self::RemoteService(detail) => {
                tracing::error!(error = %detail, "completion provider error");
                "Completion service error".to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
