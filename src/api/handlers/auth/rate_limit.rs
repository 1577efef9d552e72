//! Sliding-window throttling for the credential endpoints.
//!
//! Counters live in the `auth_attempts` table, so the limits hold across
//! every instance of the service. Every well-formed request is counted,
//! successful or not; counting successes keeps a botnet from farming a
//! known-good account for free attempts.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{Instrument, error, info_span};

const LOGIN_ATTEMPT_LIMIT: i64 = 5;
const LOGIN_WINDOW: Duration = Duration::from_secs(60);

const FORGOT_PASSWORD_ATTEMPT_LIMIT: i64 = 3;
const FORGOT_PASSWORD_WINDOW: Duration = Duration::from_secs(60);

/// Throttled endpoint classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitAction {
    Login,
    ForgotPassword,
}

impl RateLimitAction {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::ForgotPassword => "forgot_password",
        }
    }

    const fn limit(self) -> i64 {
        match self {
            Self::Login => LOGIN_ATTEMPT_LIMIT,
            Self::ForgotPassword => FORGOT_PASSWORD_ATTEMPT_LIMIT,
        }
    }

    const fn window(self) -> Duration {
        match self {
            Self::Login => LOGIN_WINDOW,
            Self::ForgotPassword => FORGOT_PASSWORD_WINDOW,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_seconds: u64 },
}

/// Count this client's attempts inside the action's window and record the
/// current one. A database failure denies the request instead of waving it
/// through.
pub(super) async fn check_and_record(
    pool: &PgPool,
    action: RateLimitAction,
    client_ip: Option<&str>,
) -> RateLimitDecision {
    match try_check_and_record(pool, action, client_ip).await {
        Ok(decision) => decision,
        Err(err) => {
            error!("Failed to apply rate limit: {err:#}");
            // Fail closed
            RateLimitDecision::Limited {
                retry_after_seconds: action.window().as_secs(),
            }
        }
    }
}

async fn try_check_and_record(
    pool: &PgPool,
    action: RateLimitAction,
    client_ip: Option<&str>,
) -> Result<RateLimitDecision> {
    let window_seconds = i64::try_from(action.window().as_secs()).unwrap_or(60);

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    // retry_after is when the oldest in-window attempt ages out.
    let query = r"
        SELECT COUNT(*) AS attempts,
               CEIL(EXTRACT(EPOCH FROM (MIN(created_at) + ($3 * INTERVAL '1 second') - NOW())))::BIGINT AS retry_after
        FROM auth_attempts
        WHERE action = $1
          AND ip_address IS NOT DISTINCT FROM $2::inet
          AND created_at > NOW() - ($3 * INTERVAL '1 second')
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );

    let row = sqlx::query(query)
        .bind(action.as_str())
        .bind(client_ip)
        .bind(window_seconds)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await
        .context("Failed to count recent attempts")?;

    let attempts: i64 = row.get("attempts");
    if attempts >= action.limit() {
        let retry_after: Option<i64> = row.get("retry_after");
        let retry_after_seconds =
            u64::try_from(retry_after.unwrap_or(window_seconds).max(1)).unwrap_or(1);
        tx.rollback()
            .await
            .context("Failed to roll back transaction")?;
        return Ok(RateLimitDecision::Limited {
            retry_after_seconds,
        });
    }

    let insert = r"INSERT INTO auth_attempts (action, ip_address) VALUES ($1, $2::inet)";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = insert
    );

    sqlx::query(insert)
        .bind(action.as_str())
        .bind(client_ip)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("Failed to record attempt")?;

    tx.commit().await.context("Failed to commit transaction")?;
    Ok(RateLimitDecision::Allowed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_names() {
        assert_eq!(RateLimitAction::Login.as_str(), "login");
        assert_eq!(RateLimitAction::ForgotPassword.as_str(), "forgot_password");
    }

    #[test]
    fn test_login_policy() {
        assert_eq!(RateLimitAction::Login.limit(), 5);
        assert_eq!(RateLimitAction::Login.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_forgot_password_policy() {
        assert_eq!(RateLimitAction::ForgotPassword.limit(), 3);
        assert_eq!(
            RateLimitAction::ForgotPassword.window(),
            Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn test_unreachable_database_fails_closed() -> anyhow::Result<()> {
        // connect_lazy never touches the network until a query runs, and
        // port 1 is never a real Postgres.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(250))
            .connect_lazy("postgres://postgres@127.0.0.1:1/postgres")?;
        let decision = check_and_record(&pool, RateLimitAction::Login, Some("203.0.113.7")).await;
        assert_eq!(
            decision,
            RateLimitDecision::Limited {
                retry_after_seconds: 60
            }
        );
        Ok(())
    }
}
