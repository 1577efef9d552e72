//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        public_base_url: auth_opts.public_base_url,
        frontend_base_url: auth_opts.frontend_base_url,
        cookie_domain: auth_opts.cookie_domain,
        session_ttl_minutes: auth_opts.session_ttl_minutes,
        email_verification_ttl_hours: auth_opts.email_verification_ttl_hours,
        password_reset_ttl_hours: auth_opts.password_reset_ttl_hours,
        email_change_ttl_hours: auth_opts.email_change_ttl_hours,
        account_deletion_ttl_hours: auth_opts.account_deletion_ttl_hours,
        invitation_ttl_hours: auth_opts.invitation_ttl_hours,
        registration_enabled: auth_opts.registration_enabled,
        invite_only: auth_opts.invite_only,
        email_from: auth_opts.email_from,
        email_outbox_poll_seconds: auth_opts.email_outbox.poll_seconds,
        email_outbox_batch_size: auth_opts.email_outbox.batch_size,
        email_outbox_max_attempts: auth_opts.email_outbox.max_attempts,
        email_outbox_backoff_base_seconds: auth_opts.email_outbox.backoff_base_seconds,
        email_outbox_backoff_max_seconds: auth_opts.email_outbox.backoff_max_seconds,
    }))
}
