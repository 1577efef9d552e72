//! `OpenAPI` document assembled from the `#[utoipa::path]` annotations on the
//! handlers. Served through Swagger UI and dumped by the `openapi` binary.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::handlers::health::health,
        crate::api::handlers::cron::cleanup_sessions,
        crate::api::handlers::auth::register::register,
        crate::api::handlers::auth::login::login,
        crate::api::handlers::auth::session::session,
        crate::api::handlers::auth::session::logout,
        crate::api::handlers::auth::password::forgot_password,
        crate::api::handlers::auth::password::reset_password,
        crate::api::handlers::auth::verification::verify_email,
        crate::api::handlers::auth::verification::confirm,
        crate::api::handlers::auth::verification::resend_verification,
        crate::api::handlers::auth::email_change::request_email_change,
        crate::api::handlers::auth::email_change::confirm_email_change,
        crate::api::handlers::auth::account::request_account_deletion,
        crate::api::handlers::auth::account::confirm_account_deletion,
        crate::api::handlers::users::list_users,
        crate::api::handlers::users::get_user,
        crate::api::handlers::users::update_user,
        crate::api::handlers::users::set_user_roles,
        crate::api::handlers::users::set_user_roster,
        crate::api::handlers::users::list_user_sessions,
        crate::api::handlers::users::revoke_user_sessions,
        crate::api::handlers::users::delete_user,
        crate::api::handlers::users::create_invitation,
    ),
    components(schemas(
        crate::api::handlers::health::Health,
        crate::api::handlers::cron::CleanupResponse,
        crate::api::handlers::auth::error::ErrorBody,
        crate::api::handlers::auth::types::StatusMessage,
        crate::api::handlers::auth::types::LoginRequest,
        crate::api::handlers::auth::types::RegisterRequest,
        crate::api::handlers::auth::types::ForgotPasswordRequest,
        crate::api::handlers::auth::types::ResetPasswordRequest,
        crate::api::handlers::auth::types::EmailChangeRequest,
        crate::api::handlers::auth::types::ResendVerificationRequest,
        crate::api::handlers::auth::types::SessionResponse,
        crate::api::handlers::auth::types::SessionUser,
        crate::api::handlers::auth::types::SessionInfo,
        crate::api::handlers::users::UserSummary,
        crate::api::handlers::users::UserDetail,
        crate::api::handlers::users::UserUpdateRequest,
        crate::api::handlers::users::RolesRequest,
        crate::api::handlers::users::RosterRequest,
        crate::api::handlers::users::UserSessionSummary,
        crate::api::handlers::users::RevokedSessions,
        crate::api::handlers::users::InvitationRequest,
    )),
    tags(
        (name = "auth", description = "Accounts, sessions, and verification flows"),
        (name = "users", description = "Roster administration"),
        (name = "cron", description = "Scheduled maintenance"),
        (name = "health", description = "Service health")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
