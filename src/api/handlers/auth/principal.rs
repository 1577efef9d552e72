//! Authenticated principal resolution and the authorization guards.

use axum::http::HeaderMap;
use sqlx::PgPool;
use uuid::Uuid;

use super::error::ApiError;
use super::session;
use super::state::AuthConfig;

/// Site-wide roles carried on the user row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Player,
    Coach,
    Admin,
}

impl Role {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Player => "PLAYER",
            Self::Coach => "COACH",
            Self::Admin => "ADMIN",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "USER" => Some(Self::User),
            "PLAYER" => Some(Self::Player),
            "COACH" => Some(Self::Coach),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Authenticated user context derived from the session cookie.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub roles: Vec<Role>,
}

impl Principal {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }
}

/// Explicit guard verdict; the denial reason ends up in the 403 body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied(&'static str),
}

impl AccessDecision {
    /// Turn a denial into the matching `ApiError`.
    pub(crate) fn require(self) -> Result<(), ApiError> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied(reason) => Err(ApiError::Forbidden(reason.to_string())),
        }
    }
}

/// Admins may act on anyone; everyone may act on themselves.
#[must_use]
pub fn authorize_admin_or_self(actor: &Principal, target_user_id: Uuid) -> AccessDecision {
    if actor.is_admin() || actor.user_id == target_user_id {
        AccessDecision::Allowed
    } else {
        AccessDecision::Denied("Not allowed to manage this user")
    }
}

#[must_use]
pub fn authorize_admin(actor: &Principal) -> AccessDecision {
    if actor.is_admin() {
        AccessDecision::Allowed
    } else {
        AccessDecision::Denied("Admin role required")
    }
}

/// Resolve the session cookie into a principal or fail with 401. Resolution
/// slides the session expiry like every other authenticated request.
pub(crate) async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    config: &AuthConfig,
) -> Result<Principal, ApiError> {
    let record = session::resolve_from_headers(headers, pool, config).await?;
    let Some(record) = record else {
        return Err(ApiError::Unauthorized);
    };

    Ok(Principal {
        user_id: record.user_id,
        username: record.username,
        email: record.email,
        roles: record
            .roles
            .iter()
            .filter_map(|role| Role::parse(role))
            .collect(),
    })
}
