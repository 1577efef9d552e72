//! Runtime configuration and shared state for the account endpoints.

use std::sync::Arc;

use crate::api::client_meta::GeoLocator;

use super::verification::VerificationKind;

const DEFAULT_SESSION_TTL_MINUTES: i64 = 7 * 24 * 60;
const DEFAULT_CSRF_TTL_MINUTES: i64 = 7 * 24 * 60;
const DEFAULT_EMAIL_VERIFICATION_TTL_HOURS: i64 = 24;
const DEFAULT_PASSWORD_RESET_TTL_HOURS: i64 = 1;
const DEFAULT_EMAIL_CHANGE_TTL_HOURS: i64 = 24;
const DEFAULT_ACCOUNT_DELETION_TTL_HOURS: i64 = 24;
const DEFAULT_INVITATION_TTL_HOURS: i64 = 7 * 24;
const DEFAULT_EMAIL_FROM: &str = "Stackwatch <noreply@stackwatch.gg>";

/// Tunables for sessions, verification tokens, and registration policy.
///
/// `public_base_url` is where this service is reachable (email confirmation
/// links point here); `frontend_base_url` is the browser-facing app (redirect
/// targets, the password reset form, and the CORS origin).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    public_base_url: String,
    frontend_base_url: String,
    cookie_domain: Option<String>,
    session_ttl_minutes: i64,
    csrf_ttl_minutes: i64,
    email_verification_ttl_hours: i64,
    password_reset_ttl_hours: i64,
    email_change_ttl_hours: i64,
    account_deletion_ttl_hours: i64,
    invitation_ttl_hours: i64,
    registration_enabled: bool,
    invite_only: bool,
    email_from: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(public_base_url: String, frontend_base_url: String) -> Self {
        Self {
            public_base_url,
            frontend_base_url,
            cookie_domain: None,
            session_ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
            csrf_ttl_minutes: DEFAULT_CSRF_TTL_MINUTES,
            email_verification_ttl_hours: DEFAULT_EMAIL_VERIFICATION_TTL_HOURS,
            password_reset_ttl_hours: DEFAULT_PASSWORD_RESET_TTL_HOURS,
            email_change_ttl_hours: DEFAULT_EMAIL_CHANGE_TTL_HOURS,
            account_deletion_ttl_hours: DEFAULT_ACCOUNT_DELETION_TTL_HOURS,
            invitation_ttl_hours: DEFAULT_INVITATION_TTL_HOURS,
            registration_enabled: true,
            invite_only: false,
            email_from: DEFAULT_EMAIL_FROM.to_string(),
        }
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, cookie_domain: Option<String>) -> Self {
        self.cookie_domain = cookie_domain.filter(|domain| !domain.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_session_ttl_minutes(mut self, minutes: i64) -> Self {
        self.session_ttl_minutes = minutes.max(1);
        self
    }

    #[must_use]
    pub fn with_csrf_ttl_minutes(mut self, minutes: i64) -> Self {
        self.csrf_ttl_minutes = minutes.max(1);
        self
    }

    #[must_use]
    pub fn with_email_verification_ttl_hours(mut self, hours: i64) -> Self {
        self.email_verification_ttl_hours = hours.max(1);
        self
    }

    #[must_use]
    pub fn with_password_reset_ttl_hours(mut self, hours: i64) -> Self {
        self.password_reset_ttl_hours = hours.max(1);
        self
    }

    #[must_use]
    pub fn with_email_change_ttl_hours(mut self, hours: i64) -> Self {
        self.email_change_ttl_hours = hours.max(1);
        self
    }

    #[must_use]
    pub fn with_account_deletion_ttl_hours(mut self, hours: i64) -> Self {
        self.account_deletion_ttl_hours = hours.max(1);
        self
    }

    #[must_use]
    pub fn with_invitation_ttl_hours(mut self, hours: i64) -> Self {
        self.invitation_ttl_hours = hours.max(1);
        self
    }

    #[must_use]
    pub fn with_registration_enabled(mut self, enabled: bool) -> Self {
        self.registration_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_invite_only(mut self, invite_only: bool) -> Self {
        self.invite_only = invite_only;
        self
    }

    #[must_use]
    pub fn with_email_from(mut self, email_from: String) -> Self {
        if !email_from.trim().is_empty() {
            self.email_from = email_from;
        }
        self
    }

    pub(crate) fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(crate) fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    /// Cookies are `Secure` exactly when the site is served over HTTPS.
    /// Local development over plain HTTP would otherwise never see them.
    pub(crate) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }

    pub(crate) fn session_ttl_minutes(&self) -> i64 {
        self.session_ttl_minutes
    }

    pub(crate) fn csrf_ttl_minutes(&self) -> i64 {
        self.csrf_ttl_minutes
    }

    pub(super) fn verification_ttl_hours(&self, kind: VerificationKind) -> i64 {
        match kind {
            VerificationKind::EmailVerification => self.email_verification_ttl_hours,
            VerificationKind::PasswordReset => self.password_reset_ttl_hours,
            VerificationKind::EmailChange => self.email_change_ttl_hours,
            VerificationKind::AccountDeletion => self.account_deletion_ttl_hours,
        }
    }

    pub(crate) fn invitation_ttl_hours(&self) -> i64 {
        self.invitation_ttl_hours
    }

    pub(crate) fn registration_enabled(&self) -> bool {
        self.registration_enabled
    }

    pub(crate) fn invite_only(&self) -> bool {
        self.invite_only
    }

    pub(crate) fn email_from(&self) -> &str {
        &self.email_from
    }
}

/// Shared state handed to every account handler.
pub struct AuthState {
    config: AuthConfig,
    geo: Arc<dyn GeoLocator>,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, geo: Arc<dyn GeoLocator>) -> Self {
        Self { config, geo }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn geo(&self) -> &dyn GeoLocator {
        self.geo.as_ref()
    }
}
