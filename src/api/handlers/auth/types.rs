//! Request and response bodies for the account endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Success envelope returned by state-changing endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusMessage {
    pub success: bool,
    pub message: String,
}

impl StatusMessage {
    pub(crate) fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email address; matched against both.
    pub username_or_email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EmailChangeRequest {
    pub new_email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResendVerificationRequest {
    pub email: String,
}

/// Token carried by emailed confirmation links.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ConfirmQuery {
    pub token: String,
}

/// Body of `GET /api/auth/session`; the endpoint returns `null` when no
/// valid session cookie is present.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub user: SessionUser,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
    pub is_email_verified: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionInfo {
    pub created_at: String,
    pub expires_at: String,
    pub device: Option<String>,
    pub location: Option<String>,
}
