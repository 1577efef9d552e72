use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

/// Parsed account, cookie, and email-outbox settings.
#[derive(Debug)]
pub struct Options {
    pub public_base_url: String,
    pub frontend_base_url: String,
    pub cookie_domain: Option<String>,
    pub session_ttl_minutes: i64,
    pub email_verification_ttl_hours: i64,
    pub password_reset_ttl_hours: i64,
    pub email_change_ttl_hours: i64,
    pub account_deletion_ttl_hours: i64,
    pub invitation_ttl_hours: i64,
    pub registration_enabled: bool,
    pub invite_only: bool,
    pub email_from: String,
    pub email_outbox: OutboxOptions,
}

#[derive(Debug)]
pub struct OutboxOptions {
    pub poll_seconds: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

impl Options {
    /// Read the auth arguments out of parsed CLI matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is somehow absent.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            public_base_url: matches
                .get_one::<String>("public-base-url")
                .cloned()
                .context("missing required argument: --public-base-url")?,
            frontend_base_url: matches
                .get_one::<String>("frontend-base-url")
                .cloned()
                .context("missing required argument: --frontend-base-url")?,
            cookie_domain: matches.get_one::<String>("cookie-domain").cloned(),
            session_ttl_minutes: matches
                .get_one::<i64>("session-ttl-minutes")
                .copied()
                .context("missing required argument: --session-ttl-minutes")?,
            email_verification_ttl_hours: matches
                .get_one::<i64>("email-verification-ttl-hours")
                .copied()
                .context("missing required argument: --email-verification-ttl-hours")?,
            password_reset_ttl_hours: matches
                .get_one::<i64>("password-reset-ttl-hours")
                .copied()
                .context("missing required argument: --password-reset-ttl-hours")?,
            email_change_ttl_hours: matches
                .get_one::<i64>("email-change-ttl-hours")
                .copied()
                .context("missing required argument: --email-change-ttl-hours")?,
            account_deletion_ttl_hours: matches
                .get_one::<i64>("account-deletion-ttl-hours")
                .copied()
                .context("missing required argument: --account-deletion-ttl-hours")?,
            invitation_ttl_hours: matches
                .get_one::<i64>("invitation-ttl-hours")
                .copied()
                .context("missing required argument: --invitation-ttl-hours")?,
            registration_enabled: matches
                .get_one::<bool>("registration-enabled")
                .copied()
                .context("missing required argument: --registration-enabled")?,
            invite_only: matches
                .get_one::<bool>("invite-only")
                .copied()
                .context("missing required argument: --invite-only")?,
            email_from: matches
                .get_one::<String>("email-from")
                .cloned()
                .context("missing required argument: --email-from")?,
            email_outbox: OutboxOptions {
                poll_seconds: matches
                    .get_one::<u64>("email-outbox-poll-seconds")
                    .copied()
                    .context("missing required argument: --email-outbox-poll-seconds")?,
                batch_size: matches
                    .get_one::<usize>("email-outbox-batch-size")
                    .copied()
                    .context("missing required argument: --email-outbox-batch-size")?,
                max_attempts: matches
                    .get_one::<u32>("email-outbox-max-attempts")
                    .copied()
                    .context("missing required argument: --email-outbox-max-attempts")?,
                backoff_base_seconds: matches
                    .get_one::<u64>("email-outbox-backoff-base-seconds")
                    .copied()
                    .context("missing required argument: --email-outbox-backoff-base-seconds")?,
                backoff_max_seconds: matches
                    .get_one::<u64>("email-outbox-backoff-max-seconds")
                    .copied()
                    .context("missing required argument: --email-outbox-backoff-max-seconds")?,
            },
        })
    }
}

pub fn with_args(command: Command) -> Command {
    let command = with_auth_url_args(command);
    let command = with_auth_session_args(command);
    let command = with_auth_verification_args(command);
    let command = with_auth_policy_args(command);
    with_auth_outbox_args(command)
}

fn with_auth_url_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("public-base-url")
                .long("public-base-url")
                .help("Public base URL of this API, used in emailed confirmation links")
                .env("STACKWATCH_PUBLIC_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL used for redirects, the reset form, and CORS")
                .env("STACKWATCH_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new("cookie-domain")
                .long("cookie-domain")
                .help("Domain attribute for auth cookies; leave unset in development")
                .env("STACKWATCH_COOKIE_DOMAIN"),
        )
}

fn with_auth_session_args(command: Command) -> Command {
    command.arg(
        Arg::new("session-ttl-minutes")
            .long("session-ttl-minutes")
            .help("Session lifetime in minutes; each authenticated request slides it forward")
            .env("STACKWATCH_SESSION_TTL_MINUTES")
            .default_value("10080")
            .value_parser(clap::value_parser!(i64)),
    )
}

fn with_auth_verification_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-verification-ttl-hours")
                .long("email-verification-ttl-hours")
                .help("Email verification token TTL in hours")
                .env("STACKWATCH_EMAIL_VERIFICATION_TTL_HOURS")
                .default_value("24")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("password-reset-ttl-hours")
                .long("password-reset-ttl-hours")
                .help("Password reset token TTL in hours")
                .env("STACKWATCH_PASSWORD_RESET_TTL_HOURS")
                .default_value("1")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("email-change-ttl-hours")
                .long("email-change-ttl-hours")
                .help("Email change token TTL in hours")
                .env("STACKWATCH_EMAIL_CHANGE_TTL_HOURS")
                .default_value("24")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("account-deletion-ttl-hours")
                .long("account-deletion-ttl-hours")
                .help("Account deletion token TTL in hours")
                .env("STACKWATCH_ACCOUNT_DELETION_TTL_HOURS")
                .default_value("24")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("invitation-ttl-hours")
                .long("invitation-ttl-hours")
                .help("Invitation TTL in hours")
                .env("STACKWATCH_INVITATION_TTL_HOURS")
                .default_value("168")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_auth_policy_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("registration-enabled")
                .long("registration-enabled")
                .help("Whether new registrations are accepted")
                .env("STACKWATCH_REGISTRATION_ENABLED")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new("invite-only")
                .long("invite-only")
                .help("Require a pending invitation to register")
                .env("STACKWATCH_INVITE_ONLY")
                .default_value("false")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new("email-from")
                .long("email-from")
                .help("From address for outgoing mail")
                .env("STACKWATCH_EMAIL_FROM")
                .default_value("Stackwatch <noreply@stackwatch.gg>"),
        )
}

fn with_auth_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-outbox-poll-seconds")
                .long("email-outbox-poll-seconds")
                .help("Email outbox poll interval in seconds")
                .env("STACKWATCH_EMAIL_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-batch-size")
                .long("email-outbox-batch-size")
                .help("Email outbox batch size per poll")
                .env("STACKWATCH_EMAIL_OUTBOX_BATCH_SIZE")
                .default_value("20")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("email-outbox-max-attempts")
                .long("email-outbox-max-attempts")
                .help("Max attempts before marking an email as failed")
                .env("STACKWATCH_EMAIL_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("email-outbox-backoff-base-seconds")
                .long("email-outbox-backoff-base-seconds")
                .help("Base delay for email outbox retry backoff")
                .env("STACKWATCH_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-backoff-max-seconds")
                .long("email-outbox-backoff-max-seconds")
                .help("Max delay for email outbox retry backoff")
                .env("STACKWATCH_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() -> Result<()> {
        temp_env::with_vars(
            [
                ("STACKWATCH_PUBLIC_BASE_URL", None::<&str>),
                ("STACKWATCH_FRONTEND_BASE_URL", None),
                ("STACKWATCH_COOKIE_DOMAIN", None),
                ("STACKWATCH_SESSION_TTL_MINUTES", None),
                ("STACKWATCH_REGISTRATION_ENABLED", None),
                ("STACKWATCH_INVITE_ONLY", None),
                ("STACKWATCH_EMAIL_FROM", None),
                ("STACKWATCH_EMAIL_OUTBOX_BATCH_SIZE", None),
            ],
            || -> Result<()> {
                let command = crate::cli::commands::new();
                let matches =
                    command.get_matches_from(vec!["stackwatch", "--dsn", "postgres://localhost"]);
                let options = Options::parse(&matches)?;

                assert_eq!(options.public_base_url, "http://localhost:8080");
                assert_eq!(options.frontend_base_url, "http://localhost:3000");
                assert_eq!(options.cookie_domain, None);
                assert_eq!(options.session_ttl_minutes, 10080);
                assert_eq!(options.email_verification_ttl_hours, 24);
                assert_eq!(options.password_reset_ttl_hours, 1);
                assert_eq!(options.invitation_ttl_hours, 168);
                assert!(options.registration_enabled);
                assert!(!options.invite_only);
                assert_eq!(options.email_from, "Stackwatch <noreply@stackwatch.gg>");
                assert_eq!(options.email_outbox.poll_seconds, 5);
                assert_eq!(options.email_outbox.batch_size, 20);
                assert_eq!(options.email_outbox.max_attempts, 5);
                Ok(())
            },
        )
    }

    #[test]
    fn test_options_env_overrides() -> Result<()> {
        temp_env::with_vars(
            [
                ("STACKWATCH_FRONTEND_BASE_URL", Some("https://stackwatch.gg")),
                ("STACKWATCH_COOKIE_DOMAIN", Some(".stackwatch.gg")),
                ("STACKWATCH_INVITE_ONLY", Some("true")),
                ("STACKWATCH_PASSWORD_RESET_TTL_HOURS", Some("2")),
            ],
            || -> Result<()> {
                let command = crate::cli::commands::new();
                let matches =
                    command.get_matches_from(vec!["stackwatch", "--dsn", "postgres://localhost"]);
                let options = Options::parse(&matches)?;

                assert_eq!(options.frontend_base_url, "https://stackwatch.gg");
                assert_eq!(options.cookie_domain, Some(".stackwatch.gg".to_string()));
                assert!(options.invite_only);
                assert_eq!(options.password_reset_ttl_hours, 2);
                Ok(())
            },
        )
    }
}
