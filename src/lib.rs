//! # Stackwatch (Team Hub Accounts & Sessions)
//!
//! `stackwatch` is the account service behind an Overwatch team hub. It owns
//! registration, login, cookie sessions, and every email-confirmed account
//! flow (verification, password reset, email change, account deletion).
//!
//! ## Sessions
//!
//! Login issues two cookies: an `HttpOnly` `session_token` and a
//! script-readable `csrf_token` (double-submit pair). Only the SHA-256 digest
//! of the session token is stored. Every successful resolution slides the
//! expiry forward, so active players stay signed in while idle sessions
//! lapse and are reaped on the next lookup.
//!
//! ## Verification tokens
//!
//! Email flows use single-use typed tokens (`EMAIL_VERIFICATION`,
//! `PASSWORD_RESET`, `EMAIL_CHANGE`, `ACCOUNT_DELETION`). Consumption is one
//! conditional `UPDATE ... RETURNING`, so a token can never be redeemed
//! twice, even by concurrent requests.
//!
//! ## Abuse controls
//!
//! Login and forgot-password are throttled per client IP with a sliding
//! window backed by Postgres, so the limits hold across every instance of
//! the service. Forgot-password and resend-verification answer identically
//! whether or not the address is registered.
//!
//! ## Roster administration
//!
//! `/api/users` exposes the team roster: roles (`USER`, `PLAYER`, `COACH`,
//! `ADMIN`), specialty (`TANK`, `DAMAGE`, `SUPPORT`, `FLEX`), and substitute
//! status. Mutations are guarded by an explicit admin-or-self check; an
//! admin editing someone else's contact details triggers a notification
//! email to the affected player.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
