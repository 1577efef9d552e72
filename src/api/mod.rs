use crate::api::handlers::{auth, cron, health, users};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request, header::CONTENT_TYPE},
    routing::{get, post, put},
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

pub mod client_meta;
pub(crate) mod email;
pub(crate) mod handlers;
// OpenAPI document assembly lives in openapi.rs.
mod openapi;

pub use client_meta::{GeoLocator, NoopGeoLocator};
pub use handlers::auth::{AuthConfig, AuthState};
pub use openapi::openapi;

/// Build the application router with all routes and shared state attached.
///
/// Server middleware (request ids, tracing, CORS, Swagger UI) is layered on in
/// [`new`]; tests drive this router directly.
#[must_use]
pub fn router(pool: PgPool, auth_state: Arc<AuthState>) -> Router {
    Router::new()
        .route(
            "/health",
            get(health::health)
                .head(health::health)
                .options(health::health),
        )
        .route("/api/auth/register", post(auth::register::register))
        .route("/api/auth/login", post(auth::login::login))
        .route("/api/auth/logout", post(auth::session::logout))
        .route("/api/auth/session", get(auth::session::session))
        .route(
            "/api/auth/email/verify",
            get(auth::verification::verify_email),
        )
        .route("/api/auth/confirm", get(auth::verification::confirm))
        .route(
            "/api/auth/resend-verification",
            post(auth::verification::resend_verification),
        )
        .route(
            "/api/auth/password/forgot",
            post(auth::password::forgot_password),
        )
        .route(
            "/api/auth/password/reset",
            post(auth::password::reset_password),
        )
        .route(
            "/api/auth/email/change",
            post(auth::email_change::request_email_change),
        )
        .route(
            "/api/auth/email/change/confirm",
            get(auth::email_change::confirm_email_change),
        )
        .route(
            "/api/auth/account-deletion",
            post(auth::account::request_account_deletion),
        )
        .route(
            "/api/auth/account-deletion/confirm",
            get(auth::account::confirm_account_deletion),
        )
        .route("/api/cron/cleanup-sessions", get(cron::cleanup_sessions))
        .route("/api/users", get(users::list_users))
        .route(
            "/api/users/:id",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/api/users/:id/roles", put(users::set_user_roles))
        .route("/api/users/:id/roster", put(users::set_user_roster))
        .route(
            "/api/users/:id/sessions",
            get(users::list_user_sessions).delete(users::revoke_user_sessions),
        )
        .route("/api/invitations", post(users::create_invitation))
        .layer(Extension(auth_state))
        .layer(Extension(pool))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: AuthConfig,
    email_config: email::EmailWorkerConfig,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let frontend_origin = frontend_origin(auth_config.frontend_base_url())?;
    let auth_state = Arc::new(AuthState::new(auth_config, Arc::new(NoopGeoLocator)));

    // Background worker polls email_outbox (DB-backed queue) for pending rows,
    // delivers/logs them, and retries failures with exponential backoff.
    email::spawn_outbox_worker(pool.clone(), Arc::new(email::LogEmailSender), email_config);

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = router(pool, auth_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
