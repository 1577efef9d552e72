//! Single-use verification tokens and the endpoints that redeem them.
//!
//! Every email-confirmed flow goes through a typed token: a token minted for
//! password reset cannot verify an email address and vice versa. Redemption
//! is a single conditional `UPDATE`, so a link can only ever be used once.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Json,
    extract::Query,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use sqlx::PgPool;
use tracing::error;

use super::credentials;
use super::error::ApiError;
use super::state::AuthState;
use super::storage;
use super::types::{ConfirmQuery, ResendVerificationRequest, StatusMessage};
use super::utils::{build_password_reset_url, frontend_redirect, normalize_email, valid_email};

/// What a one-time token is allowed to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationKind {
    EmailVerification,
    PasswordReset,
    EmailChange,
    AccountDeletion,
}

impl VerificationKind {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerification => "EMAIL_VERIFICATION",
            Self::PasswordReset => "PASSWORD_RESET",
            Self::EmailChange => "EMAIL_CHANGE",
            Self::AccountDeletion => "ACCOUNT_DELETION",
        }
    }

    pub(super) fn parse(value: &str) -> Option<Self> {
        match value {
            "EMAIL_VERIFICATION" => Some(Self::EmailVerification),
            "PASSWORD_RESET" => Some(Self::PasswordReset),
            "EMAIL_CHANGE" => Some(Self::EmailChange),
            "ACCOUNT_DELETION" => Some(Self::AccountDeletion),
            _ => None,
        }
    }
}

/// Result of redeeming a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum CompletionOutcome {
    Completed,
    InvalidToken,
    /// Email change only: the address was claimed between request and confirm.
    EmailTaken,
}

/// Consume a token of the expected kind and apply its side effect in one
/// transaction. A failure after consumption rolls the consumption back, so
/// the link stays redeemable.
pub(super) async fn complete_verification(
    pool: &PgPool,
    token: &str,
    expected_kind: VerificationKind,
) -> Result<CompletionOutcome> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let Some(record) = storage::consume_verification(&mut tx, token, Some(expected_kind)).await?
    else {
        tx.rollback()
            .await
            .context("Failed to roll back transaction")?;
        return Ok(CompletionOutcome::InvalidToken);
    };

    let outcome = match record.kind {
        VerificationKind::EmailVerification => {
            storage::mark_email_verified(&mut tx, record.user_id).await?;
            CompletionOutcome::Completed
        }
        VerificationKind::EmailChange => {
            let Some(new_email) = record.new_email.as_deref() else {
                return Err(anyhow!("Email change token has no stored address"));
            };
            match storage::apply_email_change(&mut tx, record.user_id, new_email).await? {
                storage::UpdateOutcome::Applied => CompletionOutcome::Completed,
                storage::UpdateOutcome::Duplicate => {
                    tx.rollback()
                        .await
                        .context("Failed to roll back transaction")?;
                    return Ok(CompletionOutcome::EmailTaken);
                }
                storage::UpdateOutcome::Missing => {
                    tx.rollback()
                        .await
                        .context("Failed to roll back transaction")?;
                    return Ok(CompletionOutcome::InvalidToken);
                }
            }
        }
        VerificationKind::AccountDeletion => {
            storage::delete_user(&mut tx, record.user_id).await?;
            CompletionOutcome::Completed
        }
        VerificationKind::PasswordReset => {
            // Reset tokens carry no side effect of their own; the reset
            // endpoint consumes them together with the new password.
            tx.rollback()
                .await
                .context("Failed to roll back transaction")?;
            return Ok(CompletionOutcome::InvalidToken);
        }
    };

    tx.commit().await.context("Failed to commit transaction")?;
    Ok(outcome)
}

pub(super) fn redirect_to(frontend_base_url: &str, path_and_query: &str) -> Response {
    Redirect::to(&frontend_redirect(frontend_base_url, path_and_query)).into_response()
}

/// Redeem an email verification link. Always redirects to the frontend; the
/// query string tells the login page what banner to show.
#[utoipa::path(
    get,
    path = "/api/auth/email/verify",
    params(ConfirmQuery),
    responses(
        (status = 303, description = "Redirect to the frontend with the outcome"),
    ),
    tag = "auth"
)]
pub async fn verify_email(
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Response, ApiError> {
    let frontend = auth_state.config().frontend_base_url();

    let token = query.token.trim();
    if token.is_empty() {
        return Ok(redirect_to(frontend, "/login?error=invalid-token"));
    }

    match complete_verification(&pool, token, VerificationKind::EmailVerification).await? {
        CompletionOutcome::Completed => Ok(redirect_to(frontend, "/login?verified=1")),
        CompletionOutcome::InvalidToken | CompletionOutcome::EmailTaken => {
            Ok(redirect_to(frontend, "/login?error=invalid-token"))
        }
    }
}

/// Kind-agnostic confirmation endpoint for emailed links. The token decides
/// what happens: most kinds complete in place, while password reset tokens
/// are handed to the frontend form unconsumed because the reset still needs
/// the new password.
#[utoipa::path(
    get,
    path = "/api/auth/confirm",
    params(ConfirmQuery),
    responses(
        (status = 303, description = "Redirect to the frontend with the outcome"),
    ),
    tag = "auth"
)]
pub async fn confirm(
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Response, ApiError> {
    let frontend = auth_state.config().frontend_base_url();

    let token = query.token.trim();
    if token.is_empty() {
        return Ok(redirect_to(frontend, "/login?error=invalid-token"));
    }

    let Some(kind) = storage::peek_verification_kind(&pool, token).await? else {
        return Ok(redirect_to(frontend, "/login?error=invalid-token"));
    };

    if kind == VerificationKind::PasswordReset {
        return Ok(Redirect::to(&build_password_reset_url(frontend, token)).into_response());
    }

    match complete_verification(&pool, token, kind).await? {
        CompletionOutcome::InvalidToken => Ok(redirect_to(frontend, "/login?error=invalid-token")),
        CompletionOutcome::EmailTaken => Ok(redirect_to(frontend, "/login?error=email-taken")),
        CompletionOutcome::Completed => {
            let target = match kind {
                VerificationKind::EmailVerification => "/login?verified=1",
                VerificationKind::EmailChange => "/login?email-updated=1",
                VerificationKind::AccountDeletion => "/?account-deleted=1",
                // Handled by the early return above.
                VerificationKind::PasswordReset => "/login?error=invalid-token",
            };
            Ok(redirect_to(frontend, target))
        }
    }
}

/// Queue a fresh verification email. The response is identical whether the
/// address exists, is already verified, or was never seen, so the endpoint
/// cannot be used to probe for accounts.
#[utoipa::path(
    post,
    path = "/api/auth/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Accepted", body = StatusMessage),
        (status = 400, description = "Missing payload"),
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };

    let email = normalize_email(&request.email);
    if valid_email(&email) {
        if let Err(err) =
            credentials::resend_verification_email(&pool, auth_state.config(), &email).await
        {
            error!("Failed to queue verification resend: {err:#}");
        }
    }

    Ok((
        StatusCode::OK,
        Json(StatusMessage::ok(
            "If that address needs verification, a new link is on its way.",
        )),
    )
        .into_response())
}
