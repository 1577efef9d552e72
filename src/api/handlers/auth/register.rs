//! Registration endpoint.

use std::sync::Arc;

use axum::{
    Extension, Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;

use super::credentials::{self, NewUser, RegisterOutcome};
use super::error::ApiError;
use super::state::AuthState;
use super::types::{RegisterRequest, StatusMessage};
use super::utils::{
    MIN_PASSWORD_LENGTH, normalize_email, normalize_optional, normalize_username, valid_email,
    valid_username,
};

/// Create an account. The new account starts unverified; a verification
/// email is queued in the same transaction as the user row, so registration
/// either fully happens or not at all.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created; verification email queued", body = StatusMessage),
        (status = 400, description = "Missing or invalid fields"),
        (status = 403, description = "Registration disabled, or an invitation is required"),
        (status = 409, description = "Username or email already in use"),
    ),
    tag = "auth"
)]
pub async fn register(
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };

    let username = normalize_username(&request.username);
    if !valid_username(&username) {
        return Err(ApiError::Validation(
            "Username must be 3-32 characters: lowercase letters, numbers, underscore".to_string(),
        ));
    }

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }

    if request.password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    if !auth_state.config().registration_enabled() {
        return Err(ApiError::Forbidden("Registration is disabled".to_string()));
    }

    let new_user = NewUser {
        username,
        email,
        password: request.password,
        display_name: normalize_optional(request.display_name),
    };

    match credentials::register_user(&pool, auth_state.config(), &new_user).await? {
        RegisterOutcome::Created => Ok((
            StatusCode::CREATED,
            Json(StatusMessage::ok(
                "Account created. Check your inbox to verify your email address.",
            )),
        )
            .into_response()),
        RegisterOutcome::Duplicate => Err(ApiError::Duplicate(
            "Username or email is already in use".to_string(),
        )),
        RegisterOutcome::InvitationRequired => Err(ApiError::Forbidden(
            "An invitation is required to register".to_string(),
        )),
    }
}
