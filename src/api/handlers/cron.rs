//! Scheduled maintenance endpoint.
//!
//! Expired sessions are reaped lazily on resolution, so this sweep only has
//! to catch rows whose owners never came back. It also drops consumed and
//! expired verification tokens and rate-limit attempts old enough to fall
//! outside any window.

use axum::{Extension, Json};
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;
use utoipa::ToSchema;

use super::auth::error::ApiError;
use super::auth::storage;

#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupResponse {
    pub success: bool,
    pub deleted_sessions: u64,
    pub deleted_verifications: u64,
    pub deleted_attempts: u64,
}

#[utoipa::path(
    get,
    path = "/api/cron/cleanup-sessions",
    responses(
        (status = 200, description = "Rows removed per table", body = CleanupResponse),
        (status = 500, description = "Cleanup failed"),
    ),
    tag = "cron"
)]
pub async fn cleanup_sessions(
    Extension(pool): Extension<PgPool>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let deleted_sessions = storage::delete_expired_sessions(&pool).await?;
    let deleted_verifications = storage::delete_stale_verifications(&pool).await?;
    let deleted_attempts = storage::delete_stale_auth_attempts(&pool).await?;

    info!(
        deleted_sessions,
        deleted_verifications, deleted_attempts, "Cleanup sweep finished"
    );

    Ok(Json(CleanupResponse {
        success: true,
        deleted_sessions,
        deleted_verifications,
        deleted_attempts,
    }))
}
