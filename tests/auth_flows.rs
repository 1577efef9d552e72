//! End-to-end tests for the account and session flows.
//!
//! The suite drives the real router in process with `tower::ServiceExt`:
//! 1. Point `STACKWATCH_TEST_DSN` at a throwaway Postgres database.
//! 2. The schema from `db/sql/01_stackwatch.sql` is applied on first use.
//! 3. Each test registers its own users and uses its own client address, so
//!    tests can run concurrently against the shared database.
//!
//! Without `STACKWATCH_TEST_DSN` every test is skipped.

use anyhow::{Context, Result, ensure};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use stackwatch::api::{self, AuthConfig, AuthState, NoopGeoLocator};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("../db/sql/01_stackwatch.sql");
const TEST_PASSWORD: &str = "correct-horse-9";

static SCHEMA_APPLIED: OnceLock<Mutex<bool>> = OnceLock::new();

async fn test_pool() -> Result<Option<PgPool>> {
    let Ok(dsn) = std::env::var("STACKWATCH_TEST_DSN") else {
        eprintln!("Skipping integration test: STACKWATCH_TEST_DSN is not set");
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&dsn)
        .await
        .context("failed to connect test pool")?;

    let applied = SCHEMA_APPLIED.get_or_init(|| Mutex::new(false));
    let mut guard = applied.lock().await;
    if !*guard {
        apply_schema(&pool).await?;
        *guard = true;
    }

    Ok(Some(pool))
}

async fn apply_schema(pool: &PgPool) -> Result<()> {
    for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
    }

    Ok(())
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("\\ir ") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

fn default_config() -> AuthConfig {
    AuthConfig::new(
        "http://localhost:8080".to_string(),
        "http://localhost:3000".to_string(),
    )
}

fn app(pool: &PgPool) -> Router {
    app_with(pool, default_config())
}

fn app_with(pool: &PgPool, config: AuthConfig) -> Router {
    let auth_state = Arc::new(AuthState::new(config, Arc::new(NoopGeoLocator)));
    api::router(pool.clone(), auth_state)
}

fn get_request(uri: &str) -> Result<Request<Body>> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .context("failed to build request")
}

fn cookie_request(method: &str, uri: &str, cookies: &str) -> Result<Request<Body>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, cookies)
        .body(Body::empty())
        .context("failed to build request")
}

fn json_request(method: &str, uri: &str, ip: &str, body: &Value) -> Result<Request<Body>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(body.to_string()))
        .context("failed to build request")
}

fn authed_json_request(method: &str, uri: &str, cookies: &str, body: &Value) -> Result<Request<Body>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, cookies)
        .body(Body::from(body.to_string()))
        .context("failed to build request")
}

async fn body_json(response: Response) -> Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    serde_json::from_slice(&bytes).context("response body was not valid JSON")
}

fn set_cookie_value(response: &Response, name: &str) -> Option<String> {
    for value in response.headers().get_all(header::SET_COOKIE) {
        let Ok(raw) = value.to_str() else {
            continue;
        };
        let pair = raw.split(';').next().unwrap_or(raw);
        if let Some(rest) = pair.strip_prefix(name) {
            if let Some(cookie_value) = rest.strip_prefix('=') {
                return Some(cookie_value.to_string());
            }
        }
    }
    None
}

fn cookie_cleared(response: &Response, name: &str) -> bool {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|raw| raw.starts_with(&prefix) && raw.contains("Max-Age=0"))
}

fn location_header(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn cookie_header(session: &str, csrf: &str) -> String {
    format!("session_token={session}; csrf_token={csrf}")
}

fn unique_suffix() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..12].to_string()
}

/// Unique client address per test; the rate limiter buckets by IP.
fn random_ip() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    format!("10.{}.{}.{}", bytes[0], bytes[1], bytes[2])
}

async fn register_user(app: &Router, ip: &str) -> Result<(String, String)> {
    let username = format!("t{}", unique_suffix());
    let email = format!("{username}@example.com");

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            ip,
            &json!({ "username": username, "email": email, "password": TEST_PASSWORD }),
        )?)
        .await?;
    ensure!(
        response.status() == StatusCode::CREATED,
        "register returned {}",
        response.status()
    );

    Ok((username, email))
}

async fn register_verified_user(app: &Router, pool: &PgPool, ip: &str) -> Result<(String, String)> {
    let (username, email) = register_user(app, ip).await?;

    let token = verification_token(pool, &username, "EMAIL_VERIFICATION").await?;
    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/auth/email/verify?token={token}"))?)
        .await?;
    ensure!(
        response.status() == StatusCode::SEE_OTHER,
        "email verify returned {}",
        response.status()
    );

    Ok((username, email))
}

async fn login(app: &Router, username: &str, ip: &str) -> Result<(String, String)> {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            ip,
            &json!({ "username_or_email": username, "password": TEST_PASSWORD }),
        )?)
        .await?;
    ensure!(
        response.status() == StatusCode::OK,
        "login returned {}",
        response.status()
    );

    let session =
        set_cookie_value(&response, "session_token").context("missing session_token cookie")?;
    let csrf = set_cookie_value(&response, "csrf_token").context("missing csrf_token cookie")?;
    Ok((session, csrf))
}

/// Newest unconsumed token of the given kind, fished out of the database the
/// way the emailed link would carry it.
async fn verification_token(pool: &PgPool, username: &str, kind: &str) -> Result<String> {
    let row = sqlx::query(
        "SELECT v.token FROM verifications v \
         JOIN users u ON u.id = v.user_id \
         WHERE u.username = $1 AND v.kind = $2 AND v.used_at IS NULL \
         ORDER BY v.created_at DESC LIMIT 1",
    )
    .bind(username)
    .bind(kind)
    .fetch_one(pool)
    .await
    .context("verification token not found")?;
    Ok(row.get("token"))
}

async fn user_id(pool: &PgPool, username: &str) -> Result<Uuid> {
    let row = sqlx::query("SELECT id FROM users WHERE username = $1")
        .bind(username)
        .fetch_one(pool)
        .await
        .context("user not found")?;
    Ok(row.get("id"))
}

async fn grant_admin(pool: &PgPool, username: &str) -> Result<()> {
    sqlx::query("UPDATE users SET roles = ARRAY['USER','ADMIN'] WHERE username = $1")
        .bind(username)
        .execute(pool)
        .await
        .context("failed to grant admin role")?;
    Ok(())
}

#[tokio::test]
async fn health_reports_database_ok() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let app = app(&pool);

    let response = app.clone().oneshot(get_request("/health")?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("X-App"));
    let body = body_json(response).await?;
    assert_eq!(body["database"], "ok");
    assert_eq!(body["name"], "stackwatch");

    Ok(())
}

#[tokio::test]
async fn register_login_logout_round_trip() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let app = app(&pool);
    let ip = random_ip();

    let (username, email) = register_user(&app, &ip).await?;

    // Login is refused until the address is verified.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            &ip,
            &json!({ "username_or_email": username, "password": TEST_PASSWORD }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let token = verification_token(&pool, &username, "EMAIL_VERIFICATION").await?;
    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/auth/email/verify?token={token}"))?)
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = location_header(&response);
    assert!(
        location.ends_with("/login?verified=1"),
        "unexpected redirect: {location}"
    );

    let (session, csrf) = login(&app, &username, &ip).await?;
    let cookies = cookie_header(&session, &csrf);

    let response = app
        .clone()
        .oneshot(cookie_request("GET", "/api/auth/session", &cookies)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["user"]["username"], username.as_str());
    assert_eq!(body["user"]["email"], email.as_str());
    assert_eq!(body["user"]["is_email_verified"], true);

    // Logout needs both cookies.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/logout")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A mismatched CSRF cookie is refused.
    let response = app
        .clone()
        .oneshot(cookie_request(
            "POST",
            "/api/auth/logout",
            &cookie_header(&session, "not-the-secret"),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(cookie_request("POST", "/api/auth/logout", &cookies)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(cookie_cleared(&response, "session_token"));
    assert!(cookie_cleared(&response, "csrf_token"));

    // The old cookies no longer resolve.
    let response = app
        .clone()
        .oneshot(cookie_request("GET", "/api/auth/session", &cookies)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert!(body.is_null());

    Ok(())
}

#[tokio::test]
async fn login_rate_limit_sets_retry_after() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let app = app(&pool);
    let ip = random_ip();
    let (username, _email) = register_verified_user(&app, &pool, &ip).await?;

    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/login",
                &ip,
                &json!({ "username_or_email": username, "password": "definitely-wrong" }),
            )?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // The sixth attempt inside the window is throttled before credentials
    // are even looked at.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            &ip,
            &json!({ "username_or_email": username, "password": TEST_PASSWORD }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: i64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .context("missing Retry-After header")?;
    assert!(
        (1..=60).contains(&retry_after),
        "Retry-After out of range: {retry_after}"
    );

    // A different client address is not throttled.
    let (session, _csrf) = login(&app, &username, &random_ip()).await?;
    assert!(!session.is_empty());

    Ok(())
}

#[tokio::test]
async fn forgot_password_is_enumeration_safe() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let app = app(&pool);
    let ip = random_ip();
    let (username, email) = register_verified_user(&app, &pool, &ip).await?;

    let known = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/password/forgot",
            &ip,
            &json!({ "email": email }),
        )?)
        .await?;
    let unknown = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/password/forgot",
            &ip,
            &json!({ "email": format!("nobody-{}@example.com", unique_suffix()) }),
        )?)
        .await?;

    assert_eq!(known.status(), StatusCode::OK);
    assert_eq!(unknown.status(), StatusCode::OK);
    let known_body = body_json(known).await?;
    let unknown_body = body_json(unknown).await?;
    assert_eq!(known_body, unknown_body);

    // Only the real account received a reset token.
    let token = verification_token(&pool, &username, "PASSWORD_RESET").await?;
    assert!(!token.is_empty());

    Ok(())
}

#[tokio::test]
async fn resend_verification_is_enumeration_safe() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let app = app(&pool);
    let ip = random_ip();
    let (username, email) = register_user(&app, &ip).await?;

    let known = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/resend-verification",
            &ip,
            &json!({ "email": email }),
        )?)
        .await?;
    let unknown = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/resend-verification",
            &ip,
            &json!({ "email": format!("nobody-{}@example.com", unique_suffix()) }),
        )?)
        .await?;

    assert_eq!(known.status(), StatusCode::OK);
    assert_eq!(unknown.status(), StatusCode::OK);
    assert_eq!(body_json(known).await?, body_json(unknown).await?);

    // The reissued link still verifies the address.
    let token = verification_token(&pool, &username, "EMAIL_VERIFICATION").await?;
    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/auth/email/verify?token={token}"))?)
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location_header(&response).ends_with("/login?verified=1"));

    Ok(())
}

#[tokio::test]
async fn session_expiry_slides_on_resolve() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let app = app(&pool);
    let ip = random_ip();
    let (username, _email) = register_verified_user(&app, &pool, &ip).await?;
    let (session, csrf) = login(&app, &username, &ip).await?;
    let id = user_id(&pool, &username).await?;

    // Shrink the deadline, then resolve; the deadline must move back out.
    sqlx::query("UPDATE sessions SET expires_at = NOW() + INTERVAL '1 minute' WHERE user_id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    let response = app
        .clone()
        .oneshot(cookie_request(
            "GET",
            "/api/auth/session",
            &cookie_header(&session, &csrf),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert!(!body.is_null());

    let row = sqlx::query(
        "SELECT expires_at > NOW() + INTERVAL '1 day' AS extended FROM sessions WHERE user_id = $1",
    )
    .bind(id)
    .fetch_one(&pool)
    .await?;
    assert!(row.get::<bool, _>("extended"));

    Ok(())
}

#[tokio::test]
async fn expired_session_is_reaped_on_resolve() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let app = app(&pool);
    let ip = random_ip();
    let (username, _email) = register_verified_user(&app, &pool, &ip).await?;
    let (session, csrf) = login(&app, &username, &ip).await?;
    let id = user_id(&pool, &username).await?;

    sqlx::query("UPDATE sessions SET expires_at = NOW() - INTERVAL '1 minute' WHERE user_id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    let response = app
        .clone()
        .oneshot(cookie_request(
            "GET",
            "/api/auth/session",
            &cookie_header(&session, &csrf),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert!(body.is_null());

    // The dead row was deleted on the way out, not merely ignored.
    let row = sqlx::query("SELECT COUNT(*) AS count FROM sessions WHERE user_id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(row.get::<i64, _>("count"), 0);

    Ok(())
}

#[tokio::test]
async fn password_reset_burns_token_and_revokes_sessions() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let app = app(&pool);
    let ip = random_ip();
    let (username, email) = register_verified_user(&app, &pool, &ip).await?;
    let (session, csrf) = login(&app, &username, &ip).await?;
    let cookies = cookie_header(&session, &csrf);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/password/forgot",
            &ip,
            &json!({ "email": email }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let token = verification_token(&pool, &username, "PASSWORD_RESET").await?;

    // A reset token cannot be redeemed as an email verification, and the
    // failed attempt does not consume it.
    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/auth/email/verify?token={token}"))?)
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location_header(&response).contains("error=invalid-token"));
    let unconsumed = verification_token(&pool, &username, "PASSWORD_RESET").await?;
    assert_eq!(unconsumed, token);

    let new_password = "a-different-pass-1";
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/password/reset",
            &ip,
            &json!({ "token": token, "new_password": new_password }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // Old password refused, new one accepted.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            &ip,
            &json!({ "username_or_email": username, "password": TEST_PASSWORD }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            &ip,
            &json!({ "username_or_email": username, "password": new_password }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // The token is single use.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/password/reset",
            &ip,
            &json!({ "token": token, "new_password": "yet-another-pass-1" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Sessions issued before the reset are gone.
    let response = app
        .clone()
        .oneshot(cookie_request("GET", "/api/auth/session", &cookies)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert!(body.is_null());

    Ok(())
}

#[tokio::test]
async fn invite_only_registration_requires_invitation() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let open_app = app(&pool);
    let gated_app = app_with(&pool, default_config().with_invite_only(true));
    let ip = random_ip();

    // Unsolicited signup is refused.
    let response = gated_app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            &ip,
            &json!({
                "username": format!("t{}", unique_suffix()),
                "email": format!("walkin-{}@example.com", unique_suffix()),
                "password": TEST_PASSWORD,
            }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let (admin, _email) = register_verified_user(&open_app, &pool, &ip).await?;
    grant_admin(&pool, &admin).await?;
    let (session, csrf) = login(&open_app, &admin, &ip).await?;

    let invited = format!("invited-{}@example.com", unique_suffix());
    let response = gated_app
        .clone()
        .oneshot(authed_json_request(
            "POST",
            "/api/invitations",
            &cookie_header(&session, &csrf),
            &json!({ "email": invited }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    // The invited address registers; the invitation is burned in the same
    // transaction.
    let response = gated_app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            &ip,
            &json!({
                "username": format!("t{}", unique_suffix()),
                "email": invited,
                "password": TEST_PASSWORD,
            }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let row = sqlx::query("SELECT used_at IS NOT NULL AS used FROM invitations WHERE email = $1")
        .bind(&invited)
        .fetch_one(&pool)
        .await?;
    assert!(row.get::<bool, _>("used"));

    Ok(())
}

#[tokio::test]
async fn user_surface_enforces_admin_or_self() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let app = app(&pool);
    let ip = random_ip();

    let (admin, _email) = register_verified_user(&app, &pool, &ip).await?;
    grant_admin(&pool, &admin).await?;
    let (admin_session, admin_csrf) = login(&app, &admin, &ip).await?;
    let admin_cookies = cookie_header(&admin_session, &admin_csrf);

    let (player, _email) = register_verified_user(&app, &pool, &ip).await?;
    let (player_session, player_csrf) = login(&app, &player, &ip).await?;
    let player_cookies = cookie_header(&player_session, &player_csrf);
    let player_id = user_id(&pool, &player).await?;

    // Listing users is admin only.
    let response = app
        .clone()
        .oneshot(cookie_request("GET", "/api/users", &player_cookies)?)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app
        .clone()
        .oneshot(cookie_request("GET", "/api/users", &admin_cookies)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert!(body.as_array().map(Vec::len).unwrap_or_default() >= 2);

    // Players may edit their own profile but not their own roles.
    let response = app
        .clone()
        .oneshot(authed_json_request(
            "PATCH",
            &format!("/api/users/{player_id}"),
            &player_cookies,
            &json!({ "display_name": "Slipstream" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["display_name"], "Slipstream");

    let response = app
        .clone()
        .oneshot(authed_json_request(
            "PUT",
            &format!("/api/users/{player_id}/roles"),
            &player_cookies,
            &json!({ "roles": ["USER", "ADMIN"] }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Roster assignments are an admin concern.
    let response = app
        .clone()
        .oneshot(authed_json_request(
            "PUT",
            &format!("/api/users/{player_id}/roster"),
            &admin_cookies,
            &json!({ "specialty": "TANK", "is_substitute": false }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["specialty"], "TANK");

    // Session revocation is admin or self; self counts their own session.
    let response = app
        .clone()
        .oneshot(cookie_request(
            "DELETE",
            &format!("/api/users/{player_id}/sessions"),
            &player_cookies,
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert!(body["revoked_sessions"].as_u64().unwrap_or_default() >= 1);

    let response = app
        .clone()
        .oneshot(cookie_request("GET", "/api/auth/session", &player_cookies)?)
        .await?;
    let body = body_json(response).await?;
    assert!(body.is_null());

    Ok(())
}

#[tokio::test]
async fn email_change_swaps_address_after_confirmation() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let app = app(&pool);
    let ip = random_ip();
    let (username, _email) = register_verified_user(&app, &pool, &ip).await?;
    let (session, csrf) = login(&app, &username, &ip).await?;

    let new_email = format!("new-{}@example.com", unique_suffix());
    let response = app
        .clone()
        .oneshot(authed_json_request(
            "POST",
            "/api/auth/email/change",
            &cookie_header(&session, &csrf),
            &json!({ "new_email": new_email }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let row = sqlx::query("SELECT pending_email FROM users WHERE username = $1")
        .bind(&username)
        .fetch_one(&pool)
        .await?;
    assert_eq!(
        row.get::<Option<String>, _>("pending_email").as_deref(),
        Some(new_email.as_str())
    );

    let token = verification_token(&pool, &username, "EMAIL_CHANGE").await?;
    let response = app
        .clone()
        .oneshot(get_request(&format!(
            "/api/auth/email/change/confirm?token={token}"
        ))?)
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location_header(&response).contains("email-updated=1"));

    let row = sqlx::query("SELECT email, pending_email FROM users WHERE username = $1")
        .bind(&username)
        .fetch_one(&pool)
        .await?;
    assert_eq!(row.get::<String, _>("email"), new_email);
    assert!(row.get::<Option<String>, _>("pending_email").is_none());

    Ok(())
}

#[tokio::test]
async fn account_deletion_removes_user_after_confirmation() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let app = app(&pool);
    let ip = random_ip();
    let (username, _email) = register_verified_user(&app, &pool, &ip).await?;
    let (session, csrf) = login(&app, &username, &ip).await?;

    let response = app
        .clone()
        .oneshot(cookie_request(
            "POST",
            "/api/auth/account-deletion",
            &cookie_header(&session, &csrf),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let token = verification_token(&pool, &username, "ACCOUNT_DELETION").await?;
    let response = app
        .clone()
        .oneshot(get_request(&format!(
            "/api/auth/account-deletion/confirm?token={token}"
        ))?)
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location_header(&response).contains("account-deleted=1"));

    let row = sqlx::query("SELECT COUNT(*) AS count FROM users WHERE username = $1")
        .bind(&username)
        .fetch_one(&pool)
        .await?;
    assert_eq!(row.get::<i64, _>("count"), 0);

    Ok(())
}

#[tokio::test]
async fn cleanup_cron_sweeps_stale_rows() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let app = app(&pool);
    let ip = random_ip();
    let (username, _email) = register_verified_user(&app, &pool, &ip).await?;
    let (_session, _csrf) = login(&app, &username, &ip).await?;
    let id = user_id(&pool, &username).await?;

    sqlx::query("UPDATE sessions SET expires_at = NOW() - INTERVAL '1 hour' WHERE user_id = $1")
        .bind(id)
        .execute(&pool)
        .await?;
    sqlx::query(
        "INSERT INTO verifications (user_id, kind, token, used_at, created_at, expires_at) \
         VALUES ($1, 'EMAIL_VERIFICATION', $2, NOW() - INTERVAL '35 days', \
                 NOW() - INTERVAL '40 days', NOW() - INTERVAL '39 days')",
    )
    .bind(id)
    .bind(format!("stale-{}", unique_suffix()))
    .execute(&pool)
    .await?;
    sqlx::query(
        "INSERT INTO auth_attempts (action, ip_address, created_at) \
         VALUES ('login', '203.0.113.9', NOW() - INTERVAL '2 days')",
    )
    .execute(&pool)
    .await?;

    let response = app
        .clone()
        .oneshot(get_request("/api/cron/cleanup-sessions")?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["success"], true);
    assert!(body["deleted_sessions"].as_u64().unwrap_or_default() >= 1);
    assert!(body["deleted_verifications"].as_u64().unwrap_or_default() >= 1);
    assert!(body["deleted_attempts"].as_u64().unwrap_or_default() >= 1);

    Ok(())
}
