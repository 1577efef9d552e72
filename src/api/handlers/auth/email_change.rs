//! Change the account email with confirmation from the new address.
//!
//! The current address keeps working until the new one is confirmed; the
//! pending address is recorded on the user row and the swap happens when
//! the EMAIL_CHANGE token is redeemed.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::Query,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;

use super::credentials;
use super::error::ApiError;
use super::principal;
use super::state::AuthState;
use super::storage;
use super::types::{ConfirmQuery, EmailChangeRequest, StatusMessage};
use super::utils::{normalize_email, valid_email};
use super::verification::{self, CompletionOutcome, VerificationKind};

/// Start an email change for the signed-in user. Requires a live session;
/// the confirmation link goes to the new address.
#[utoipa::path(
    post,
    path = "/api/auth/email/change",
    request_body = EmailChangeRequest,
    responses(
        (status = 200, description = "Confirmation queued to the new address", body = StatusMessage),
        (status = 400, description = "Missing or invalid payload"),
        (status = 401, description = "Not signed in"),
        (status = 409, description = "Address already in use"),
    ),
    tag = "auth"
)]
pub async fn request_email_change(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    payload: Option<Json<EmailChangeRequest>>,
) -> Result<Response, ApiError> {
    let config = auth_state.config();
    let actor = principal::require_auth(&headers, &pool, config).await?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };

    let new_email = normalize_email(&request.new_email);
    if !valid_email(&new_email) {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }
    if new_email == actor.email {
        return Err(ApiError::Validation(
            "New email matches the current address".to_string(),
        ));
    }

    // Early duplicate check for a friendly error; the unique index still
    // protects the final swap at confirmation time.
    if storage::email_taken(&pool, &new_email).await? {
        return Err(ApiError::Duplicate("Email is already in use".to_string()));
    }

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    storage::set_pending_email(&mut tx, actor.user_id, &new_email).await?;
    let token = storage::insert_verification(
        &mut tx,
        actor.user_id,
        VerificationKind::EmailChange,
        Some(&new_email),
        config.verification_ttl_hours(VerificationKind::EmailChange),
    )
    .await?;
    let message = credentials::email_change_email(config, &new_email, &actor.username, &token);
    storage::enqueue_email(&mut tx, &message).await?;
    tx.commit().await.context("Failed to commit transaction")?;

    Ok((
        StatusCode::OK,
        Json(StatusMessage::ok(
            "Confirmation sent to the new address. The change applies once confirmed.",
        )),
    )
        .into_response())
}

/// Redeem an EMAIL_CHANGE token: swap the address stored with the token
/// onto the account and clear the pending marker.
#[utoipa::path(
    get,
    path = "/api/auth/email/change/confirm",
    params(ConfirmQuery),
    responses(
        (status = 303, description = "Redirect to the frontend with the outcome"),
    ),
    tag = "auth"
)]
pub async fn confirm_email_change(
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Response, ApiError> {
    let frontend = auth_state.config().frontend_base_url();

    let token = query.token.trim();
    if token.is_empty() {
        return Ok(verification::redirect_to(frontend, "/login?error=invalid-token"));
    }

    match verification::complete_verification(&pool, token, VerificationKind::EmailChange).await? {
        CompletionOutcome::Completed => {
            Ok(verification::redirect_to(frontend, "/login?email-updated=1"))
        }
        CompletionOutcome::EmailTaken => {
            Ok(verification::redirect_to(frontend, "/login?error=email-taken"))
        }
        CompletionOutcome::InvalidToken => {
            Ok(verification::redirect_to(frontend, "/login?error=invalid-token"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client_meta::NoopGeoLocator;
    use crate::api::handlers::auth::state::AuthConfig;

    #[tokio::test]
    async fn test_request_email_change_requires_session() -> anyhow::Result<()> {
        let pool = PgPool::connect_lazy("postgres://postgres@localhost/postgres")?;
        let auth_state = Arc::new(AuthState::new(
            AuthConfig::new(
                "http://localhost:8080".to_string(),
                "http://localhost:3000".to_string(),
            ),
            Arc::new(NoopGeoLocator),
        ));
        let payload = Json(EmailChangeRequest {
            new_email: "new@example.com".to_string(),
        });

        let result = request_email_change(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state),
            Some(payload),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
        Ok(())
    }
}
