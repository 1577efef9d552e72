//! Password reset: the public request endpoint and the token redemption.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Extension, Json,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use tracing::error;

use super::credentials;
use super::error::ApiError;
use super::rate_limit::{self, RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage;
use super::types::{ForgotPasswordRequest, ResetPasswordRequest, StatusMessage};
use super::utils::{MIN_PASSWORD_LENGTH, extract_client_ip, normalize_email, valid_email};

const FORGOT_PASSWORD_MESSAGE: &str =
    "If that email is recognized, a password reset link is on its way.";

/// Request a password reset link.
///
/// The response body is byte-identical whether or not the address belongs to
/// an account; even a storage failure on the lookup path is logged rather
/// than surfaced, so timing aside there is nothing to probe.
#[utoipa::path(
    post,
    path = "/api/auth/password/forgot",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Accepted", body = StatusMessage),
        (status = 400, description = "Missing or invalid payload"),
        (status = 429, description = "Too many requests from this address"),
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }

    let client_ip = extract_client_ip(&headers);
    if let RateLimitDecision::Limited {
        retry_after_seconds,
    } = rate_limit::check_and_record(
        &pool,
        RateLimitAction::ForgotPassword,
        client_ip.as_deref(),
    )
    .await
    {
        return Err(ApiError::RateLimited {
            retry_after_seconds,
        });
    }

    if let Err(err) = credentials::start_password_reset(&pool, auth_state.config(), &email).await {
        error!("Failed to start password reset: {err:#}");
    }

    Ok((
        StatusCode::OK,
        Json(StatusMessage::ok(FORGOT_PASSWORD_MESSAGE)),
    )
        .into_response())
}

/// Redeem a reset token and set the new password.
///
/// Consuming the token, rewriting the hash, and revoking every open session
/// commit together; whoever holds the old password or an old cookie is
/// signed out the moment the reset lands.
#[utoipa::path(
    post,
    path = "/api/auth/password/reset",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = StatusMessage),
        (status = 400, description = "Invalid or expired token, or bad password"),
    ),
    tag = "auth"
)]
pub async fn reset_password(
    Extension(pool): Extension<PgPool>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };

    let token = request.token.trim();
    if token.is_empty() {
        return Err(ApiError::Validation("Missing token".to_string()));
    }

    if request.new_password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    // Only PASSWORD_RESET tokens are accepted here. A verification token
    // leaked from some other flow cannot take over the account.
    let consumed = storage::consume_verification(
        &mut tx,
        token,
        Some(super::verification::VerificationKind::PasswordReset),
    )
    .await?;
    let Some(record) = consumed else {
        tx.rollback()
            .await
            .context("Failed to roll back transaction")?;
        return Err(ApiError::InvalidToken);
    };

    credentials::update_password(&mut tx, record.user_id, &request.new_password).await?;
    storage::delete_sessions_for_user(&mut tx, record.user_id).await?;

    tx.commit().await.context("Failed to commit transaction")?;

    Ok((
        StatusCode::OK,
        Json(StatusMessage::ok("Password updated. You can now log in.")),
    )
        .into_response())
}
