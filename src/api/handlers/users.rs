//! Roster administration: list and inspect users, edit contact and profile
//! fields, assign roles and roster slots, manage sessions, and invite new
//! members.
//!
//! Every route resolves the caller's session first and then applies an
//! explicit guard: plain role checks for admin-only routes, admin-or-self
//! for per-user routes. Contact mutations go through the credential manager
//! so an admin editing someone else's details triggers the notification
//! email.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{Instrument, info_span};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::credentials::{self, ContactOutcome, ContactUpdate};
use super::auth::error::ApiError;
use super::auth::principal::{self, Role, authorize_admin, authorize_admin_or_self};
use super::auth::state::AuthState;
use super::auth::storage::{self, InvitationOutcome};
use super::auth::types::StatusMessage;
use super::auth::utils::{
    normalize_email, normalize_optional, normalize_username, valid_email, valid_username,
};

/// Roster specialty, mirroring the in-game role buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Specialty {
    Tank,
    Damage,
    Support,
    Flex,
}

impl Specialty {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Tank => "TANK",
            Self::Damage => "DAMAGE",
            Self::Support => "SUPPORT",
            Self::Flex => "FLEX",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "TANK" => Some(Self::Tank),
            "DAMAGE" => Some(Self::Damage),
            "SUPPORT" => Some(Self::Support),
            "FLEX" => Some(Self::Flex),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub roles: Vec<String>,
    pub specialty: String,
    pub is_substitute: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserDetail {
    pub id: String,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub roles: Vec<String>,
    pub specialty: String,
    pub is_substitute: bool,
    pub is_email_verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserUpdateRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RolesRequest {
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RosterRequest {
    pub specialty: String,
    #[serde(default)]
    pub is_substitute: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserSessionSummary {
    pub id: String,
    pub device: Option<String>,
    pub location: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevokedSessions {
    pub success: bool,
    pub revoked_sessions: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InvitationRequest {
    pub email: String,
}

fn parse_user_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id.trim()).map_err(|_| ApiError::Validation("Invalid user id".to_string()))
}

/// Full roster, admins only.
#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "All users", body = [UserSummary]),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admin role required"),
    ),
    tag = "users"
)]
pub async fn list_users(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let actor = principal::require_auth(&headers, &pool, auth_state.config()).await?;
    authorize_admin(&actor).require()?;

    let query = r"
        SELECT id, username, display_name, avatar_url, roles, specialty, is_substitute
        FROM users
        ORDER BY username
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );

    let rows = sqlx::query(query)
        .fetch_all(&pool)
        .instrument(span)
        .await
        .context("Failed to list users")?;

    let users = rows
        .into_iter()
        .map(|row| UserSummary {
            id: row.get::<Uuid, _>("id").to_string(),
            username: row.get("username"),
            display_name: row.get("display_name"),
            avatar_url: row.get("avatar_url"),
            roles: row.get("roles"),
            specialty: row.get("specialty"),
            is_substitute: row.get("is_substitute"),
        })
        .collect();

    Ok(Json(users))
}

async fn fetch_user_detail(pool: &PgPool, user_id: Uuid) -> Result<Option<UserDetail>, ApiError> {
    let query = r#"
        SELECT id, username, email, display_name, avatar_url, roles, specialty,
               is_substitute, is_email_verified,
               to_char(created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at,
               to_char(updated_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS updated_at
        FROM users
        WHERE id = $1
    "#;
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );

    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("Failed to fetch user")?;

    Ok(row.map(|row| UserDetail {
        id: row.get::<Uuid, _>("id").to_string(),
        username: row.get("username"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        avatar_url: row.get("avatar_url"),
        roles: row.get("roles"),
        specialty: row.get("specialty"),
        is_substitute: row.get("is_substitute"),
        is_email_verified: row.get("is_email_verified"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}

/// One user in full; admins or the user themselves.
#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "User detail", body = UserDetail),
        (status = 403, description = "Not allowed to view this user"),
        (status = 404, description = "No such user"),
    ),
    tag = "users"
)]
pub async fn get_user(
    headers: HeaderMap,
    Path(id): Path<String>,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Result<Json<UserDetail>, ApiError> {
    let user_id = parse_user_id(&id)?;
    let actor = principal::require_auth(&headers, &pool, auth_state.config()).await?;
    authorize_admin_or_self(&actor, user_id).require()?;

    let Some(detail) = fetch_user_detail(&pool, user_id).await? else {
        return Err(ApiError::NotFound);
    };
    Ok(Json(detail))
}

/// Update contact and profile fields; admins or the user themselves. An
/// admin changing someone else's username or email triggers a notification
/// to the previous address.
#[utoipa::path(
    patch,
    path = "/api/users/{id}",
    params(("id" = String, Path, description = "User id")),
    request_body = UserUpdateRequest,
    responses(
        (status = 200, description = "Updated user", body = UserDetail),
        (status = 400, description = "Invalid fields"),
        (status = 403, description = "Not allowed to edit this user"),
        (status = 404, description = "No such user"),
        (status = 409, description = "Username or email already in use"),
    ),
    tag = "users"
)]
pub async fn update_user(
    headers: HeaderMap,
    Path(id): Path<String>,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    payload: Option<Json<UserUpdateRequest>>,
) -> Result<Json<UserDetail>, ApiError> {
    let user_id = parse_user_id(&id)?;
    let actor = principal::require_auth(&headers, &pool, auth_state.config()).await?;
    authorize_admin_or_self(&actor, user_id).require()?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };

    let username = match normalize_optional(request.username) {
        Some(raw) => {
            let username = normalize_username(&raw);
            if !valid_username(&username) {
                return Err(ApiError::Validation(
                    "Username must be 3-32 characters: lowercase letters, numbers, underscore"
                        .to_string(),
                ));
            }
            Some(username)
        }
        None => None,
    };

    let email = match normalize_optional(request.email) {
        Some(raw) => {
            let email = normalize_email(&raw);
            if !valid_email(&email) {
                return Err(ApiError::Validation("Invalid email address".to_string()));
            }
            Some(email)
        }
        None => None,
    };

    let avatar_url = normalize_optional(request.avatar_url);
    if let Some(avatar) = avatar_url.as_deref() {
        let parsed = Url::parse(avatar)
            .map_err(|_| ApiError::Validation("Avatar URL is not a valid URL".to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ApiError::Validation(
                "Avatar URL must be http or https".to_string(),
            ));
        }
    }

    let update = ContactUpdate {
        username,
        email,
        display_name: normalize_optional(request.display_name),
        avatar_url,
    };

    if update.username.is_none()
        && update.email.is_none()
        && update.display_name.is_none()
        && update.avatar_url.is_none()
    {
        return Err(ApiError::Validation("No fields to update".to_string()));
    }

    match credentials::update_contact(&pool, auth_state.config(), &actor, user_id, &update).await? {
        ContactOutcome::Updated => {}
        ContactOutcome::Duplicate => {
            return Err(ApiError::Duplicate(
                "Username or email is already in use".to_string(),
            ));
        }
        ContactOutcome::NotFound => return Err(ApiError::NotFound),
    }

    let Some(detail) = fetch_user_detail(&pool, user_id).await? else {
        return Err(ApiError::NotFound);
    };
    Ok(Json(detail))
}

/// Replace a user's role set, admins only.
#[utoipa::path(
    put,
    path = "/api/users/{id}/roles",
    params(("id" = String, Path, description = "User id")),
    request_body = RolesRequest,
    responses(
        (status = 200, description = "Updated user", body = UserDetail),
        (status = 400, description = "Unknown role"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "No such user"),
    ),
    tag = "users"
)]
pub async fn set_user_roles(
    headers: HeaderMap,
    Path(id): Path<String>,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    payload: Option<Json<RolesRequest>>,
) -> Result<Json<UserDetail>, ApiError> {
    let user_id = parse_user_id(&id)?;
    let actor = principal::require_auth(&headers, &pool, auth_state.config()).await?;
    authorize_admin(&actor).require()?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    if request.roles.is_empty() {
        return Err(ApiError::Validation(
            "At least one role is required".to_string(),
        ));
    }

    let mut roles = Vec::with_capacity(request.roles.len());
    for raw in &request.roles {
        let Some(role) = Role::parse(raw) else {
            return Err(ApiError::Validation(format!("Unknown role: {raw}")));
        };
        let name = role.as_str().to_string();
        if !roles.contains(&name) {
            roles.push(name);
        }
    }

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let found = storage::set_roles(&mut tx, user_id, &roles).await?;
    tx.commit().await.context("Failed to commit transaction")?;
    if !found {
        return Err(ApiError::NotFound);
    }

    let Some(detail) = fetch_user_detail(&pool, user_id).await? else {
        return Err(ApiError::NotFound);
    };
    Ok(Json(detail))
}

/// Assign a roster slot (specialty and substitute status), admins only.
#[utoipa::path(
    put,
    path = "/api/users/{id}/roster",
    params(("id" = String, Path, description = "User id")),
    request_body = RosterRequest,
    responses(
        (status = 200, description = "Updated user", body = UserDetail),
        (status = 400, description = "Unknown specialty"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "No such user"),
    ),
    tag = "users"
)]
pub async fn set_user_roster(
    headers: HeaderMap,
    Path(id): Path<String>,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    payload: Option<Json<RosterRequest>>,
) -> Result<Json<UserDetail>, ApiError> {
    let user_id = parse_user_id(&id)?;
    let actor = principal::require_auth(&headers, &pool, auth_state.config()).await?;
    authorize_admin(&actor).require()?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    let Some(specialty) = Specialty::parse(&request.specialty) else {
        return Err(ApiError::Validation(format!(
            "Unknown specialty: {}",
            request.specialty
        )));
    };

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let found =
        storage::set_roster(&mut tx, user_id, specialty.as_str(), request.is_substitute).await?;
    tx.commit().await.context("Failed to commit transaction")?;
    if !found {
        return Err(ApiError::NotFound);
    }

    let Some(detail) = fetch_user_detail(&pool, user_id).await? else {
        return Err(ApiError::NotFound);
    };
    Ok(Json(detail))
}

/// Active sessions for a user; admins or the user themselves. Raw tokens
/// are never stored, so there is nothing sensitive to leak here.
#[utoipa::path(
    get,
    path = "/api/users/{id}/sessions",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Active sessions", body = [UserSessionSummary]),
        (status = 403, description = "Not allowed to view this user"),
    ),
    tag = "users"
)]
pub async fn list_user_sessions(
    headers: HeaderMap,
    Path(id): Path<String>,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Result<Json<Vec<UserSessionSummary>>, ApiError> {
    let user_id = parse_user_id(&id)?;
    let actor = principal::require_auth(&headers, &pool, auth_state.config()).await?;
    authorize_admin_or_self(&actor, user_id).require()?;

    let query = r#"
        SELECT id, device, location, host(ip_address) AS ip_address, user_agent,
               to_char(created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at,
               to_char(expires_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS expires_at
        FROM sessions
        WHERE user_id = $1
          AND expires_at > NOW()
        ORDER BY created_at DESC
    "#;
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );

    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(&pool)
        .instrument(span)
        .await
        .context("Failed to list sessions")?;

    let sessions = rows
        .into_iter()
        .map(|row| UserSessionSummary {
            id: row.get::<Uuid, _>("id").to_string(),
            device: row.get("device"),
            location: row.get("location"),
            ip_address: row.get("ip_address"),
            user_agent: row.get("user_agent"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        })
        .collect();

    Ok(Json(sessions))
}

/// Sign a user out everywhere; admins or the user themselves.
#[utoipa::path(
    delete,
    path = "/api/users/{id}/sessions",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Sessions revoked", body = RevokedSessions),
        (status = 403, description = "Not allowed to manage this user"),
    ),
    tag = "users"
)]
pub async fn revoke_user_sessions(
    headers: HeaderMap,
    Path(id): Path<String>,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Result<Json<RevokedSessions>, ApiError> {
    let user_id = parse_user_id(&id)?;
    let actor = principal::require_auth(&headers, &pool, auth_state.config()).await?;
    authorize_admin_or_self(&actor, user_id).require()?;

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let revoked = storage::delete_sessions_for_user(&mut tx, user_id).await?;
    tx.commit().await.context("Failed to commit transaction")?;

    Ok(Json(RevokedSessions {
        success: true,
        revoked_sessions: revoked,
    }))
}

/// Delete an account outright; admins or the user themselves. The
/// self-service flow behind an emailed confirmation exists as well; this is
/// the immediate, session-authenticated variant.
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted", body = StatusMessage),
        (status = 403, description = "Not allowed to delete this user"),
        (status = 404, description = "No such user"),
    ),
    tag = "users"
)]
pub async fn delete_user(
    headers: HeaderMap,
    Path(id): Path<String>,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let user_id = parse_user_id(&id)?;
    let actor = principal::require_auth(&headers, &pool, auth_state.config()).await?;
    authorize_admin_or_self(&actor, user_id).require()?;

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let deleted = storage::delete_user(&mut tx, user_id).await?;
    tx.commit().await.context("Failed to commit transaction")?;

    if !deleted {
        return Err(ApiError::NotFound);
    }
    Ok((StatusCode::OK, Json(StatusMessage::ok("User deleted"))).into_response())
}

/// Invite an email address to register, admins only. Meaningful when the
/// service runs invite-only; harmless otherwise.
#[utoipa::path(
    post,
    path = "/api/invitations",
    request_body = InvitationRequest,
    responses(
        (status = 201, description = "Invitation created", body = StatusMessage),
        (status = 400, description = "Invalid email"),
        (status = 403, description = "Admin role required"),
        (status = 409, description = "An invitation for this email is already pending"),
    ),
    tag = "users"
)]
pub async fn create_invitation(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    payload: Option<Json<InvitationRequest>>,
) -> Result<Response, ApiError> {
    let actor = principal::require_auth(&headers, &pool, auth_state.config()).await?;
    authorize_admin(&actor).require()?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }

    let outcome = storage::upsert_invitation(
        &pool,
        &email,
        actor.user_id,
        auth_state.config().invitation_ttl_hours(),
    )
    .await?;

    match outcome {
        InvitationOutcome::Created => Ok((
            StatusCode::CREATED,
            Json(StatusMessage::ok("Invitation created")),
        )
            .into_response()),
        InvitationOutcome::AlreadyPending => Err(ApiError::Duplicate(
            "An invitation for this email is already pending".to_string(),
        )),
    }
}
