//! Account deletion, gated behind an emailed confirmation link.

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
use super::types::{ConfirmQuery, StatusMessage};
use super::verification::{self, CompletionOutcome, VerificationKind};

/// Start account deletion for the signed-in user. Nothing is deleted yet;
/// a confirmation link goes to the address on file.
#[utoipa::path(
    post,
    path = "/api/auth/account-deletion",
    responses(
        (status = 200, description = "Confirmation email queued", body = StatusMessage),
        (status = 401, description = "Not signed in"),
    ),
    tag = "auth"
)]
pub async fn request_account_deletion(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let config = auth_state.config();
    let actor = principal::require_auth(&headers, &pool, config).await?;

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let token = storage::insert_verification(
        &mut tx,
        actor.user_id,
        VerificationKind::AccountDeletion,
        None,
        config.verification_ttl_hours(VerificationKind::AccountDeletion),
    )
    .await?;
    let message = credentials::account_deletion_email(config, &actor.email, &actor.username, &token);
    storage::enqueue_email(&mut tx, &message).await?;
    tx.commit().await.context("Failed to commit transaction")?;

    Ok((
        StatusCode::OK,
        Json(StatusMessage::ok(
            "Check your email to confirm account deletion.",
        )),
    )
        .into_response())
}

/// Redeem an ACCOUNT_DELETION token. The user row goes away and sessions,
/// verifications, and invitations follow by cascade.
#[utoipa::path(
    get,
    path = "/api/auth/account-deletion/confirm",
    params(ConfirmQuery),
    responses(
        (status = 303, description = "Redirect to the frontend with the outcome"),
    ),
    tag = "auth"
)]
pub async fn confirm_account_deletion(
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Response, ApiError> {
    let frontend = auth_state.config().frontend_base_url();

    let token = query.token.trim();
    if token.is_empty() {
        return Ok(verification::redirect_to(frontend, "/login?error=invalid-token"));
    }

    match verification::complete_verification(&pool, token, VerificationKind::AccountDeletion)
        .await?
    {
        CompletionOutcome::Completed => {
            Ok(verification::redirect_to(frontend, "/?account-deleted=1"))
        }
        CompletionOutcome::InvalidToken | CompletionOutcome::EmailTaken => {
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
    async fn test_request_account_deletion_requires_session() -> anyhow::Result<()> {
        let pool = PgPool::connect_lazy("postgres://postgres@localhost/postgres")?;
        let auth_state = Arc::new(AuthState::new(
            AuthConfig::new(
                "http://localhost:8080".to_string(),
                "http://localhost:3000".to_string(),
            ),
            Arc::new(NoopGeoLocator),
        ));

        let result =
            request_account_deletion(HeaderMap::new(), Extension(pool), Extension(auth_state))
                .await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
        Ok(())
    }
}
