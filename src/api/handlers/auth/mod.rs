//! Account endpoints: registration, login, cookie sessions, and every
//! email-confirmed flow (verification, password reset, email change,
//! account deletion), plus the guards and throttling they share.
//!
//! Handlers stay thin: validation and status mapping live here, credential
//! and token rules live in [`credentials`] and [`verification`], and all
//! SQL is in [`storage`].

pub(crate) mod account;
pub(crate) mod credentials;
pub(crate) mod email_change;
pub(crate) mod error;
pub(crate) mod login;
pub(crate) mod password;
pub(crate) mod principal;
pub(crate) mod rate_limit;
pub(crate) mod register;
pub(crate) mod session;
pub(crate) mod state;
pub(crate) mod storage;
pub(crate) mod types;
pub(crate) mod utils;
pub(crate) mod verification;

pub use principal::{AccessDecision, Principal, Role, authorize_admin, authorize_admin_or_self};
pub use rate_limit::{RateLimitAction, RateLimitDecision};
pub use state::{AuthConfig, AuthState};
pub use verification::VerificationKind;
