//! Login endpoint: rate limit, credential check, session issuance.

use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    Extension, Json,
    http::{
        HeaderMap, StatusCode,
        header::{SET_COOKIE, USER_AGENT},
    },
    response::{IntoResponse, Response},
};
use sqlx::PgPool;

use crate::api::client_meta::classify_device;

use super::credentials;
use super::error::ApiError;
use super::rate_limit::{self, RateLimitAction, RateLimitDecision};
use super::session;
use super::state::AuthState;
use super::storage::NewSession;
use super::types::{LoginRequest, StatusMessage};
use super::utils::extract_client_ip;

/// Authenticate and set the session cookie pair.
///
/// Two distinct failures are reported distinctly on purpose: a bad
/// credential pair is a 401, an unverified email is a 403. The 403 only
/// fires after the password matched, so it reveals nothing that the caller
/// has not already proven they know.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in; session and CSRF cookies set", body = StatusMessage),
        (status = 400, description = "Missing or malformed payload"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Email not verified"),
        (status = 429, description = "Too many attempts from this address"),
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };

    let login_id = request.username_or_email.trim().to_lowercase();
    if login_id.is_empty() || request.password.is_empty() {
        return Err(ApiError::Validation(
            "Username and password are required".to_string(),
        ));
    }

    // Counted for every well-formed request, success or failure.
    let client_ip = extract_client_ip(&headers);
    if let RateLimitDecision::Limited {
        retry_after_seconds,
    } = rate_limit::check_and_record(&pool, RateLimitAction::Login, client_ip.as_deref()).await
    {
        return Err(ApiError::RateLimited {
            retry_after_seconds,
        });
    }

    let Some(user) = credentials::verify_credentials(&pool, &login_id, &request.password).await?
    else {
        return Err(ApiError::InvalidCredentials);
    };

    if !user.is_email_verified {
        return Err(ApiError::EmailNotVerified);
    }

    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let device = classify_device(user_agent.as_deref().unwrap_or_default());
    let location = client_ip
        .as_deref()
        .and_then(|ip| auth_state.geo().locate(ip))
        .map(|found| found.label());

    let meta = NewSession {
        ip_address: client_ip,
        user_agent,
        device: Some(device.as_str().to_string()),
        location,
    };
    let tokens = session::create_session(&pool, auth_state.config(), user.user_id, &meta).await?;

    let mut response_headers = HeaderMap::new();
    let session_cookie = session::session_cookie(auth_state.config(), &tokens.session_token)
        .map_err(|err| anyhow!("Failed to build session cookie: {err}"))?;
    let csrf_cookie = session::csrf_cookie(auth_state.config(), &tokens.csrf_secret)
        .map_err(|err| anyhow!("Failed to build CSRF cookie: {err}"))?;
    response_headers.append(SET_COOKIE, session_cookie);
    response_headers.append(SET_COOKIE, csrf_cookie);

    Ok((
        StatusCode::OK,
        response_headers,
        Json(StatusMessage::ok("Logged in")),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client_meta::NoopGeoLocator;
    use crate::api::handlers::auth::state::AuthConfig;

    fn test_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new(
                "http://localhost:8080".to_string(),
                "http://localhost:3000".to_string(),
            ),
            Arc::new(NoopGeoLocator),
        ))
    }

    #[tokio::test]
    async fn test_login_requires_payload() -> anyhow::Result<()> {
        let pool = PgPool::connect_lazy("postgres://postgres@localhost/postgres")?;
        let result = login(HeaderMap::new(), Extension(pool), Extension(test_state()), None).await;
        match result {
            Err(ApiError::Validation(message)) => assert_eq!(message, "Missing payload"),
            other => panic!("expected a validation error, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_login_rejects_blank_fields() -> anyhow::Result<()> {
        let pool = PgPool::connect_lazy("postgres://postgres@localhost/postgres")?;
        let payload = Json(LoginRequest {
            username_or_email: "   ".to_string(),
            password: String::new(),
        });
        let result = login(
            HeaderMap::new(),
            Extension(pool),
            Extension(test_state()),
            Some(payload),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
        Ok(())
    }
}
