//! Cookie sessions: issue, resolve with sliding expiration, and destroy.
//!
//! A session is a pair of cookies. `session_token` is the HttpOnly bearer;
//! only its SHA-256 digest is stored. `csrf_token` is readable by the
//! frontend and must match the secret stored with the session on
//! state-changing requests (double-submit).

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Extension, Json,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use super::error::ApiError;
use super::state::{AuthConfig, AuthState};
use super::storage::{self, NewSession, SessionRecord, SessionTokens};
use super::types::{SessionInfo, SessionResponse, SessionUser, StatusMessage};
use super::utils::hash_token;

pub(crate) const SESSION_COOKIE_NAME: &str = "session_token";
pub(crate) const CSRF_COOKIE_NAME: &str = "csrf_token";

/// Issue a session for a freshly authenticated user.
pub(super) async fn create_session(
    pool: &PgPool,
    config: &AuthConfig,
    user_id: Uuid,
    meta: &NewSession,
) -> Result<SessionTokens> {
    storage::insert_session(pool, user_id, meta, config.session_ttl_minutes()).await
}

/// Resolve the session cookie in `headers`. A hit slides the expiry forward
/// by the full session TTL.
pub(super) async fn resolve_from_headers(
    headers: &HeaderMap,
    pool: &PgPool,
    config: &AuthConfig,
) -> Result<Option<SessionRecord>> {
    let Some(token) = extract_cookie(headers, SESSION_COOKIE_NAME) else {
        return Ok(None);
    };
    storage::resolve_session(pool, &hash_token(&token), config.session_ttl_minutes()).await
}

/// Double-submit check: the supplied CSRF value must equal the secret stored
/// with the (still live) session.
pub(super) async fn validate_csrf(
    pool: &PgPool,
    config: &AuthConfig,
    raw_session_token: &str,
    supplied_csrf: &str,
) -> Result<bool> {
    if supplied_csrf.trim().is_empty() {
        return Ok(false);
    }

    let record = storage::resolve_session(
        pool,
        &hash_token(raw_session_token),
        config.session_ttl_minutes(),
    )
    .await?;

    Ok(record.is_some_and(|record| record.csrf_secret == supplied_csrf))
}

/// Read one cookie value out of the `Cookie` header.
pub(super) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            if key == name && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

pub(super) fn session_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = config.session_ttl_minutes().saturating_mul(60);
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}"
    );
    append_cookie_scope(&mut cookie, config);
    HeaderValue::from_str(&cookie)
}

/// Deliberately not HttpOnly: the frontend reads this cookie and echoes the
/// value on state-changing requests.
pub(super) fn csrf_cookie(
    config: &AuthConfig,
    secret: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = config.csrf_ttl_minutes().saturating_mul(60);
    let mut cookie =
        format!("{CSRF_COOKIE_NAME}={secret}; Path=/; SameSite=Strict; Max-Age={max_age}");
    append_cookie_scope(&mut cookie, config);
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0");
    append_cookie_scope(&mut cookie, config);
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_csrf_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{CSRF_COOKIE_NAME}=; Path=/; SameSite=Strict; Max-Age=0");
    append_cookie_scope(&mut cookie, config);
    HeaderValue::from_str(&cookie)
}

fn append_cookie_scope(cookie: &mut String, config: &AuthConfig) {
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    if let Some(domain) = config.cookie_domain() {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
}

fn session_response(record: SessionRecord) -> SessionResponse {
    SessionResponse {
        user: SessionUser {
            id: record.user_id.to_string(),
            username: record.username,
            email: record.email,
            roles: record.roles,
            is_email_verified: record.is_email_verified,
        },
        session: SessionInfo {
            created_at: record.created_at,
            expires_at: record.expires_at,
            device: record.device,
            location: record.location,
        },
    }
}

/// Current session, or `null` when the cookie is absent, expired, or bogus.
/// Resolving here extends the session like any other authenticated request.
#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "Current session, or null when signed out", body = Option<SessionResponse>),
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Result<Json<Option<SessionResponse>>, ApiError> {
    let record = resolve_from_headers(&headers, &pool, auth_state.config()).await?;
    Ok(Json(record.map(session_response)))
}

/// Destroy the current session and expire both cookies. Requires the CSRF
/// cookie to match the stored secret. Racing a concurrent logout is fine;
/// deleting an already-deleted session still succeeds.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Session destroyed", body = StatusMessage),
        (status = 401, description = "Session or CSRF cookie missing"),
        (status = 403, description = "CSRF token mismatch"),
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let config = auth_state.config();

    let session_token = extract_cookie(&headers, SESSION_COOKIE_NAME);
    let csrf_token = extract_cookie(&headers, CSRF_COOKIE_NAME);
    let (Some(session_token), Some(csrf_token)) = (session_token, csrf_token) else {
        return Err(ApiError::Unauthorized);
    };

    if !validate_csrf(&pool, config, &session_token, &csrf_token).await? {
        return Err(ApiError::Forbidden("CSRF token mismatch".to_string()));
    }

    storage::delete_session(&pool, &hash_token(&session_token)).await?;

    let mut response_headers = HeaderMap::new();
    match (clear_session_cookie(config), clear_csrf_cookie(config)) {
        (Ok(session_clear), Ok(csrf_clear)) => {
            response_headers.append(SET_COOKIE, session_clear);
            response_headers.append(SET_COOKIE, csrf_clear);
        }
        _ => error!("Failed to build logout cookies"),
    }

    Ok((
        StatusCode::OK,
        response_headers,
        Json(StatusMessage::ok("Logged out")),
    )
        .into_response())
}
