//! Error type shared by the account and roster endpoints.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

/// Body returned by every failing endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    /// Deliberately vague: does not reveal whether the account exists.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Only reachable after the password checked out, so this leaks nothing
    /// an attacker could not already confirm.
    #[error("Email not verified. Check your inbox for the verification link.")]
    EmailNotVerified,

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    /// Covers missing, expired, already-used, and wrong-kind tokens alike.
    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Duplicate(String),

    #[error("Too many requests")]
    RateLimited { retry_after_seconds: u64 },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidToken => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::EmailNotVerified | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Duplicate(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(err) => {
                error!("Request failed: {err:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(ErrorBody {
            success: false,
            error: message,
        });

        match self {
            Self::RateLimited {
                retry_after_seconds,
            } => {
                let retry_after = HeaderValue::from_str(&retry_after_seconds.to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("60"));
                (status, [(RETRY_AFTER, retry_after)], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}
