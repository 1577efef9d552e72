//! Database access for users, sessions, verification tokens, invitations,
//! and the outgoing email queue.

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::api::email::EmailMessage;

use super::utils::{
    CSRF_SECRET_BYTES, SESSION_TOKEN_BYTES, VERIFICATION_TOKEN_BYTES, hash_token,
    is_unique_violation, random_token,
};
use super::verification::VerificationKind;

/// Retries for the freak case of a generated token colliding on its unique index.
const INSERT_TOKEN_MAX_ATTEMPTS: usize = 3;

/// Credential row used by login.
pub(super) struct CredentialRecord {
    pub user_id: Uuid,
    pub password_hash: String,
    pub is_email_verified: bool,
}

/// Single query covering both login identifiers.
pub(super) async fn find_credentials(
    pool: &PgPool,
    username_or_email: &str,
) -> Result<Option<CredentialRecord>> {
    let query = r"
        SELECT id, password_hash, is_email_verified
        FROM users
        WHERE username = $1 OR email = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );

    let row = sqlx::query(query)
        .bind(username_or_email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("Failed to look up credentials")?;

    Ok(row.map(|row| CredentialRecord {
        user_id: row.get("id"),
        password_hash: row.get("password_hash"),
        is_email_verified: row.get("is_email_verified"),
    }))
}

/// Contact row used by the enumeration-safe flows (forgot password, resend).
pub(super) struct UserContact {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub is_email_verified: bool,
}

pub(super) async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserContact>> {
    let query = r"
        SELECT id, username, email, is_email_verified
        FROM users
        WHERE email = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );

    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("Failed to look up user by email")?;

    Ok(row.map(|row| UserContact {
        user_id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        is_email_verified: row.get("is_email_verified"),
    }))
}

/// Combined uniqueness probe: true when either identifier is already taken.
pub(super) async fn identity_taken(
    tx: &mut Transaction<'_, Postgres>,
    username: &str,
    email: &str,
) -> Result<bool> {
    let query = r"SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 OR email = $2) AS taken";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );

    let row = sqlx::query(query)
        .bind(username)
        .bind(email)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to check identifier availability")?;

    Ok(row.get("taken"))
}

pub(super) async fn email_taken(pool: &PgPool, email: &str) -> Result<bool> {
    let query = r"SELECT EXISTS (SELECT 1 FROM users WHERE email = $1) AS taken";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );

    let row = sqlx::query(query)
        .bind(email)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("Failed to check email availability")?;

    Ok(row.get("taken"))
}

/// Returns `None` when a unique constraint fired, i.e. the caller lost a race
/// for the username or email.
pub(super) async fn insert_user(
    tx: &mut Transaction<'_, Postgres>,
    username: &str,
    email: &str,
    password_hash: &str,
    display_name: Option<&str>,
) -> Result<Option<Uuid>> {
    let query = r"
        INSERT INTO users (username, email, password_hash, display_name)
        VALUES ($1, $2, $3, $4)
        RETURNING id
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    let result = sqlx::query(query)
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(display_name)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await;

    match result {
        Ok(row) => Ok(Some(row.get("id"))),
        Err(err) if is_unique_violation(&err) => Ok(None),
        Err(err) => Err(err).context("Failed to insert user"),
    }
}

pub(super) async fn set_password_hash(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    password_hash: &str,
) -> Result<bool> {
    let query = r"UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to update password hash")?;

    Ok(result.rows_affected() > 0)
}

pub(super) async fn mark_email_verified(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<bool> {
    let query = r"UPDATE users SET is_email_verified = TRUE, updated_at = NOW() WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to mark email verified")?;

    Ok(result.rows_affected() > 0)
}

pub(super) async fn set_pending_email(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    pending_email: &str,
) -> Result<bool> {
    let query = r"UPDATE users SET pending_email = $2, updated_at = NOW() WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .bind(user_id)
        .bind(pending_email)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to record pending email")?;

    Ok(result.rows_affected() > 0)
}

/// Outcome of a user row update that can trip a unique constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum UpdateOutcome {
    Applied,
    Duplicate,
    Missing,
}

/// Move a confirmed email change onto the user row. Confirming the link
/// proves control of the new address, so it arrives verified.
pub(super) async fn apply_email_change(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    new_email: &str,
) -> Result<UpdateOutcome> {
    let query = r"
        UPDATE users
        SET email = $2,
            pending_email = NULL,
            is_email_verified = TRUE,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .bind(user_id)
        .bind(new_email)
        .execute(&mut **tx)
        .instrument(span)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => Ok(UpdateOutcome::Applied),
        Ok(_) => Ok(UpdateOutcome::Missing),
        Err(err) if is_unique_violation(&err) => Ok(UpdateOutcome::Duplicate),
        Err(err) => Err(err).context("Failed to apply email change"),
    }
}

/// Username and email as currently stored, read inside the caller's
/// transaction so the notification decision matches what gets overwritten.
pub(super) struct ContactSnapshot {
    pub username: String,
    pub email: String,
}

pub(super) async fn contact_snapshot(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<Option<ContactSnapshot>> {
    let query = r"SELECT username, email FROM users WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );

    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to read contact snapshot")?;

    Ok(row.map(|row| ContactSnapshot {
        username: row.get("username"),
        email: row.get("email"),
    }))
}

/// Partial update of profile and contact fields; absent fields keep their value.
pub(super) async fn update_contact_fields(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    username: Option<&str>,
    email: Option<&str>,
    display_name: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<UpdateOutcome> {
    let query = r"
        UPDATE users
        SET username = COALESCE($2, username),
            email = COALESCE($3, email),
            display_name = COALESCE($4, display_name),
            avatar_url = COALESCE($5, avatar_url),
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .bind(user_id)
        .bind(username)
        .bind(email)
        .bind(display_name)
        .bind(avatar_url)
        .execute(&mut **tx)
        .instrument(span)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => Ok(UpdateOutcome::Applied),
        Ok(_) => Ok(UpdateOutcome::Missing),
        Err(err) if is_unique_violation(&err) => Ok(UpdateOutcome::Duplicate),
        Err(err) => Err(err).context("Failed to update contact fields"),
    }
}

pub(crate) async fn set_roles(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    roles: &[String],
) -> Result<bool> {
    let query = r"UPDATE users SET roles = $2, updated_at = NOW() WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .bind(user_id)
        .bind(roles)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to update roles")?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn set_roster(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    specialty: &str,
    is_substitute: bool,
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET specialty = $2, is_substitute = $3, updated_at = NOW()
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .bind(user_id)
        .bind(specialty)
        .bind(is_substitute)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to update roster assignment")?;

    Ok(result.rows_affected() > 0)
}

/// Sessions, verifications, and invitations referencing the user go with it
/// via foreign key cascade.
pub(crate) async fn delete_user(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> Result<bool> {
    let query = r"DELETE FROM users WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to delete user")?;

    Ok(result.rows_affected() > 0)
}

/// Fully resolved session joined with its user.
pub(crate) struct SessionRecord {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
    pub is_email_verified: bool,
    pub csrf_secret: String,
    pub device: Option<String>,
    pub location: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}

/// Client metadata captured at login.
#[derive(Debug, Default)]
pub(super) struct NewSession {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device: Option<String>,
    pub location: Option<String>,
}

/// Raw cookie values for a freshly created session.
pub(super) struct SessionTokens {
    pub session_token: String,
    pub csrf_secret: String,
}

pub(super) async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    meta: &NewSession,
    ttl_minutes: i64,
) -> Result<SessionTokens> {
    let query = r"
        INSERT INTO sessions (user_id, token_hash, csrf_secret, ip_address, user_agent, device, location, expires_at)
        VALUES ($1, $2, $3, $4::inet, $5, $6, $7, NOW() + ($8 * INTERVAL '1 minute'))
    ";

    for _ in 0..INSERT_TOKEN_MAX_ATTEMPTS {
        let session_token = random_token(SESSION_TOKEN_BYTES)?;
        let csrf_secret = random_token(CSRF_SECRET_BYTES)?;
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );

        let result = sqlx::query(query)
            .bind(user_id)
            .bind(hash_token(&session_token))
            .bind(&csrf_secret)
            .bind(meta.ip_address.as_deref())
            .bind(meta.user_agent.as_deref())
            .bind(meta.device.as_deref())
            .bind(meta.location.as_deref())
            .bind(ttl_minutes)
            .execute(pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => {
                return Ok(SessionTokens {
                    session_token,
                    csrf_secret,
                });
            }
            Err(err) if is_unique_violation(&err) => continue,
            Err(err) => return Err(err).context("Failed to insert session"),
        }
    }

    Err(anyhow!("Exhausted attempts to generate a unique session token"))
}

/// Look up a live session by token digest and slide its expiry forward.
/// Refresh and read are a single statement, so concurrent requests cannot
/// observe a session that is live but unextended.
pub(super) async fn resolve_session(
    pool: &PgPool,
    token_hash: &str,
    ttl_minutes: i64,
) -> Result<Option<SessionRecord>> {
    let query = r#"
        WITH refreshed AS (
            UPDATE sessions
            SET expires_at = NOW() + ($2 * INTERVAL '1 minute')
            WHERE token_hash = $1
              AND expires_at > NOW()
            RETURNING id, user_id, csrf_secret, device, location, created_at, expires_at
        )
        SELECT refreshed.id,
               refreshed.user_id,
               refreshed.csrf_secret,
               refreshed.device,
               refreshed.location,
               to_char(refreshed.created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at,
               to_char(refreshed.expires_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS expires_at,
               users.username,
               users.email,
               users.roles,
               users.is_email_verified
        FROM refreshed
        JOIN users ON users.id = refreshed.user_id
    "#;
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(ttl_minutes)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("Failed to resolve session")?;

    if let Some(row) = row {
        return Ok(Some(SessionRecord {
            session_id: row.get("id"),
            user_id: row.get("user_id"),
            username: row.get("username"),
            email: row.get("email"),
            roles: row.get("roles"),
            is_email_verified: row.get("is_email_verified"),
            csrf_secret: row.get("csrf_secret"),
            device: row.get("device"),
            location: row.get("location"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        }));
    }

    // The miss may be an expired row; reap it now instead of leaving it for
    // the cleanup cron.
    let cleanup = r"DELETE FROM sessions WHERE token_hash = $1 AND expires_at <= NOW()";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = cleanup
    );

    sqlx::query(cleanup)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to reap expired session")?;

    Ok(None)
}

pub(super) async fn delete_session(pool: &PgPool, token_hash: &str) -> Result<()> {
    let query = r"DELETE FROM sessions WHERE token_hash = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );

    // Logout is idempotent; it's fine if no rows are deleted.
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

pub(crate) async fn delete_sessions_for_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<u64> {
    let query = r"DELETE FROM sessions WHERE user_id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to delete user sessions")?;

    Ok(result.rows_affected())
}

pub(crate) async fn delete_expired_sessions(pool: &PgPool) -> Result<u64> {
    let query = r"DELETE FROM sessions WHERE expires_at <= NOW()";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}

/// Consumed verification row.
pub(super) struct VerificationRecord {
    pub user_id: Uuid,
    pub kind: VerificationKind,
    pub new_email: Option<String>,
}

/// Store a single-use token. The token is kept raw so the emailed link and
/// the row stay directly comparable; uniqueness is enforced by the table.
pub(super) async fn insert_verification(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    kind: VerificationKind,
    new_email: Option<&str>,
    ttl_hours: i64,
) -> Result<String> {
    let query = r"
        INSERT INTO verifications (user_id, kind, token, new_email, expires_at)
        VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 hour'))
    ";

    for _ in 0..INSERT_TOKEN_MAX_ATTEMPTS {
        let token = random_token(VERIFICATION_TOKEN_BYTES)?;
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );

        let result = sqlx::query(query)
            .bind(user_id)
            .bind(kind.as_str())
            .bind(&token)
            .bind(new_email)
            .bind(ttl_hours)
            .execute(&mut **tx)
            .instrument(span)
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => continue,
            Err(err) => return Err(err).context("Failed to insert verification token"),
        }
    }

    Err(anyhow!(
        "Exhausted attempts to generate a unique verification token"
    ))
}

/// Consume a token in one conditional `UPDATE`. Only a live row of the
/// expected kind is returned; concurrent redeemers serialize on the row
/// lock and exactly one of them wins.
pub(super) async fn consume_verification(
    tx: &mut Transaction<'_, Postgres>,
    token: &str,
    expected_kind: Option<VerificationKind>,
) -> Result<Option<VerificationRecord>> {
    let query = r"
        UPDATE verifications
        SET used_at = NOW()
        WHERE token = $1
          AND used_at IS NULL
          AND expires_at > NOW()
          AND ($2::text IS NULL OR kind = $2::text)
        RETURNING user_id, kind, new_email
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    let row = sqlx::query(query)
        .bind(token)
        .bind(expected_kind.map(VerificationKind::as_str))
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to consume verification token")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let kind: String = row.get("kind");
    let kind = VerificationKind::parse(&kind)
        .ok_or_else(|| anyhow!("Unknown verification kind in database: {kind}"))?;

    Ok(Some(VerificationRecord {
        user_id: row.get("user_id"),
        kind,
        new_email: row.get("new_email"),
    }))
}

/// Kind of a live token without consuming it. The generic confirm endpoint
/// uses this to decide between completing in place and handing the token to
/// the password reset form.
pub(super) async fn peek_verification_kind(
    pool: &PgPool,
    token: &str,
) -> Result<Option<VerificationKind>> {
    let query = r"
        SELECT kind
        FROM verifications
        WHERE token = $1
          AND used_at IS NULL
          AND expires_at > NOW()
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );

    let row = sqlx::query(query)
        .bind(token)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("Failed to inspect verification token")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let kind: String = row.get("kind");
    Ok(VerificationKind::parse(&kind))
}

/// True when an unconsumed token of this kind was issued recently. Resends
/// check this to avoid flooding an inbox.
pub(super) async fn recent_verification_exists(
    pool: &PgPool,
    user_id: Uuid,
    kind: VerificationKind,
    within_seconds: i64,
) -> Result<bool> {
    let query = r"
        SELECT EXISTS (
            SELECT 1
            FROM verifications
            WHERE user_id = $1
              AND kind = $2
              AND used_at IS NULL
              AND created_at > NOW() - ($3 * INTERVAL '1 second')
        ) AS recent
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );

    let row = sqlx::query(query)
        .bind(user_id)
        .bind(kind.as_str())
        .bind(within_seconds)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("Failed to check for recent verification")?;

    Ok(row.get("recent"))
}

/// Drop consumed and long-expired tokens. Recent expired rows are kept so
/// support can answer "my link stopped working" questions.
pub(crate) async fn delete_stale_verifications(pool: &PgPool) -> Result<u64> {
    let query = r"
        DELETE FROM verifications
        WHERE (used_at IS NOT NULL OR expires_at <= NOW())
          AND created_at < NOW() - INTERVAL '30 days'
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to delete stale verifications")?;

    Ok(result.rows_affected())
}

/// Mark a pending invitation used. False when none is live for this email.
pub(super) async fn consume_invitation(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
) -> Result<bool> {
    let query = r"
        UPDATE invitations
        SET used_at = NOW()
        WHERE email = $1
          AND used_at IS NULL
          AND expires_at > NOW()
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .bind(email)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to consume invitation")?;

    Ok(result.rows_affected() > 0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InvitationOutcome {
    Created,
    AlreadyPending,
}

/// Create or refresh an invitation. A live invitation is left untouched and
/// reported as already pending; used or expired rows are recycled.
pub(crate) async fn upsert_invitation(
    pool: &PgPool,
    email: &str,
    invited_by: Uuid,
    ttl_hours: i64,
) -> Result<InvitationOutcome> {
    let query = r"
        INSERT INTO invitations (email, invited_by, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 hour'))
        ON CONFLICT (email) DO UPDATE
        SET invited_by = EXCLUDED.invited_by,
            used_at = NULL,
            created_at = NOW(),
            expires_at = EXCLUDED.expires_at
        WHERE invitations.used_at IS NOT NULL
           OR invitations.expires_at <= NOW()
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    let result = sqlx::query(query)
        .bind(email)
        .bind(invited_by)
        .bind(ttl_hours)
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to upsert invitation")?;

    if result.rows_affected() == 0 {
        Ok(InvitationOutcome::AlreadyPending)
    } else {
        Ok(InvitationOutcome::Created)
    }
}

/// Rate limit counters only matter inside their window; a day is plenty.
pub(crate) async fn delete_stale_auth_attempts(pool: &PgPool) -> Result<u64> {
    let query = r"DELETE FROM auth_attempts WHERE created_at < NOW() - INTERVAL '1 day'";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );

    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to delete stale auth attempts")?;

    Ok(result.rows_affected())
}

/// Queue an email inside the caller's transaction so the state change and
/// the send intent commit or roll back together.
pub(crate) async fn enqueue_email(
    tx: &mut Transaction<'_, Postgres>,
    message: &EmailMessage,
) -> Result<()> {
    let query = r"
        INSERT INTO email_outbox (from_email, to_email, subject, body)
        VALUES ($1, $2, $3, $4)
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    sqlx::query(query)
        .bind(&message.from_email)
        .bind(&message.to_email)
        .bind(&message.subject)
        .bind(&message.body)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to enqueue email")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_outcome_debug_names() {
        assert_eq!(format!("{:?}", UpdateOutcome::Applied), "Applied");
        assert_eq!(format!("{:?}", UpdateOutcome::Duplicate), "Duplicate");
        assert_eq!(format!("{:?}", UpdateOutcome::Missing), "Missing");
    }

    #[test]
    fn test_invitation_outcome_debug_names() {
        assert_eq!(format!("{:?}", InvitationOutcome::Created), "Created");
        assert_eq!(
            format!("{:?}", InvitationOutcome::AlreadyPending),
            "AlreadyPending"
        );
    }

    #[test]
    fn test_new_session_default_is_empty() {
        let meta = NewSession::default();
        assert!(meta.ip_address.is_none());
        assert!(meta.user_agent.is_none());
        assert!(meta.device.is_none());
        assert!(meta.location.is_none());
    }
}
