//! Credential management: password hashing, registration, verification
//! resends, password reset bootstrap, and contact updates.
//!
//! Every surface that touches credentials goes through this module, so the
//! hashing scheme and the duplicate-identifier rules live in exactly one
//! place.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::api::email::EmailMessage;

use super::principal::Principal;
use super::state::AuthConfig;
use super::storage;
use super::utils::{build_account_deletion_url, build_email_change_url, build_email_verify_url, build_password_reset_url};
use super::verification::VerificationKind;

/// Seconds between verification resends for the same account.
const RESEND_COOLDOWN_SECONDS: i64 = 60;

/// Hash a password with Argon2id and a per-password salt.
pub(super) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("Failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored PHC hash. A malformed hash verifies as
/// false rather than erroring; login treats both the same way.
pub(super) fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// What login needs to know after a successful credential check.
pub(super) struct AuthenticatedUser {
    pub user_id: Uuid,
    pub is_email_verified: bool,
}

/// Fail-closed credential check: an unknown identifier and a wrong password
/// are indistinguishable to the caller.
pub(super) async fn verify_credentials(
    pool: &PgPool,
    username_or_email: &str,
    password: &str,
) -> Result<Option<AuthenticatedUser>> {
    let Some(record) = storage::find_credentials(pool, username_or_email).await? else {
        return Ok(None);
    };

    if !verify_password(password, &record.password_hash) {
        return Ok(None);
    }

    Ok(Some(AuthenticatedUser {
        user_id: record.user_id,
        is_email_verified: record.is_email_verified,
    }))
}

/// Validated, normalized registration input.
pub(super) struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum RegisterOutcome {
    Created,
    Duplicate,
    InvitationRequired,
}

/// Create an account, queue the verification email, and (in invite-only
/// mode) burn the invitation, all in one transaction. Any failure rolls the
/// whole registration back, so a half-created account can never exist.
pub(super) async fn register_user(
    pool: &PgPool,
    config: &AuthConfig,
    new_user: &NewUser,
) -> Result<RegisterOutcome> {
    // CPU-bound; keep it outside the transaction.
    let password_hash = hash_password(&new_user.password)?;

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    if config.invite_only() && !storage::consume_invitation(&mut tx, &new_user.email).await? {
        tx.rollback()
            .await
            .context("Failed to roll back transaction")?;
        return Ok(RegisterOutcome::InvitationRequired);
    }

    if storage::identity_taken(&mut tx, &new_user.username, &new_user.email).await? {
        tx.rollback()
            .await
            .context("Failed to roll back transaction")?;
        return Ok(RegisterOutcome::Duplicate);
    }

    let inserted = storage::insert_user(
        &mut tx,
        &new_user.username,
        &new_user.email,
        &password_hash,
        new_user.display_name.as_deref(),
    )
    .await?;

    // The explicit check above can still lose a race; the unique indexes
    // have the final say.
    let Some(user_id) = inserted else {
        tx.rollback()
            .await
            .context("Failed to roll back transaction")?;
        return Ok(RegisterOutcome::Duplicate);
    };

    let token = storage::insert_verification(
        &mut tx,
        user_id,
        VerificationKind::EmailVerification,
        None,
        config.verification_ttl_hours(VerificationKind::EmailVerification),
    )
    .await?;
    let message = verification_email(config, &new_user.email, &new_user.username, &token);
    storage::enqueue_email(&mut tx, &message).await?;

    tx.commit().await.context("Failed to commit transaction")?;
    Ok(RegisterOutcome::Created)
}

/// Re-issue the verification email for an unverified account. A no-op for
/// unknown or already verified addresses, and throttled per account so a
/// stranger cannot flood someone's inbox.
pub(super) async fn resend_verification_email(
    pool: &PgPool,
    config: &AuthConfig,
    email: &str,
) -> Result<()> {
    let Some(user) = storage::find_user_by_email(pool, email).await? else {
        return Ok(());
    };
    if user.is_email_verified {
        return Ok(());
    }
    if storage::recent_verification_exists(
        pool,
        user.user_id,
        VerificationKind::EmailVerification,
        RESEND_COOLDOWN_SECONDS,
    )
    .await?
    {
        return Ok(());
    }

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let token = storage::insert_verification(
        &mut tx,
        user.user_id,
        VerificationKind::EmailVerification,
        None,
        config.verification_ttl_hours(VerificationKind::EmailVerification),
    )
    .await?;
    let message = verification_email(config, &user.email, &user.username, &token);
    storage::enqueue_email(&mut tx, &message).await?;
    tx.commit().await.context("Failed to commit transaction")?;
    Ok(())
}

/// Issue a password reset token and queue the email. Silently does nothing
/// for unknown addresses; the endpoint's response never varies.
pub(super) async fn start_password_reset(
    pool: &PgPool,
    config: &AuthConfig,
    email: &str,
) -> Result<()> {
    let Some(user) = storage::find_user_by_email(pool, email).await? else {
        return Ok(());
    };

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let token = storage::insert_verification(
        &mut tx,
        user.user_id,
        VerificationKind::PasswordReset,
        None,
        config.verification_ttl_hours(VerificationKind::PasswordReset),
    )
    .await?;
    let message = password_reset_email(config, &user.email, &user.username, &token);
    storage::enqueue_email(&mut tx, &message).await?;
    tx.commit().await.context("Failed to commit transaction")?;
    Ok(())
}

/// Re-hash and persist a new password inside the caller's transaction.
/// Callers decide what happens to open sessions.
pub(super) async fn update_password(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    new_password: &str,
) -> Result<bool> {
    let password_hash = hash_password(new_password)?;
    storage::set_password_hash(tx, user_id, &password_hash).await
}

/// Partial contact/profile update; `None` fields keep their current value.
pub(crate) struct ContactUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ContactOutcome {
    Updated,
    Duplicate,
    NotFound,
}

/// Apply a contact update on behalf of `actor`. When an admin edits someone
/// else's username or email, a notice is queued to the address on file
/// before the change, in the same transaction as the update itself.
pub(crate) async fn update_contact(
    pool: &PgPool,
    config: &AuthConfig,
    actor: &Principal,
    target_user_id: Uuid,
    update: &ContactUpdate,
) -> Result<ContactOutcome> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let Some(before) = storage::contact_snapshot(&mut tx, target_user_id).await? else {
        tx.rollback()
            .await
            .context("Failed to roll back transaction")?;
        return Ok(ContactOutcome::NotFound);
    };

    let outcome = storage::update_contact_fields(
        &mut tx,
        target_user_id,
        update.username.as_deref(),
        update.email.as_deref(),
        update.display_name.as_deref(),
        update.avatar_url.as_deref(),
    )
    .await?;

    match outcome {
        storage::UpdateOutcome::Duplicate => {
            tx.rollback()
                .await
                .context("Failed to roll back transaction")?;
            return Ok(ContactOutcome::Duplicate);
        }
        storage::UpdateOutcome::Missing => {
            tx.rollback()
                .await
                .context("Failed to roll back transaction")?;
            return Ok(ContactOutcome::NotFound);
        }
        storage::UpdateOutcome::Applied => {}
    }

    let username_changed = update
        .username
        .as_deref()
        .is_some_and(|username| username != before.username);
    let email_changed = update
        .email
        .as_deref()
        .is_some_and(|email| email != before.email);
    if actor.user_id != target_user_id && (username_changed || email_changed) {
        let notice = contact_change_notice(config, &before, update, &actor.username);
        storage::enqueue_email(&mut tx, &notice).await?;
    }

    tx.commit().await.context("Failed to commit transaction")?;
    Ok(ContactOutcome::Updated)
}

fn verification_email(
    config: &AuthConfig,
    to_email: &str,
    username: &str,
    token: &str,
) -> EmailMessage {
    let link = build_email_verify_url(config.public_base_url(), token);
    let ttl_hours = config.verification_ttl_hours(VerificationKind::EmailVerification);
    EmailMessage {
        from_email: config.email_from().to_string(),
        to_email: to_email.to_string(),
        subject: "Verify your email address".to_string(),
        body: format!(
            "Hi {username},\n\nWelcome to the team hub. Confirm your email address to activate \
             your account:\n\n{link}\n\nThe link expires in {ttl_hours} hours. If you didn't \
             sign up, you can ignore this message.\n"
        ),
    }
}

fn password_reset_email(
    config: &AuthConfig,
    to_email: &str,
    username: &str,
    token: &str,
) -> EmailMessage {
    let link = build_password_reset_url(config.frontend_base_url(), token);
    let ttl_hours = config.verification_ttl_hours(VerificationKind::PasswordReset);
    EmailMessage {
        from_email: config.email_from().to_string(),
        to_email: to_email.to_string(),
        subject: "Reset your password".to_string(),
        body: format!(
            "Hi {username},\n\nSomeone asked to reset the password for this account. If that \
             was you, pick a new password here:\n\n{link}\n\nThe link expires in {ttl_hours} \
             hour(s) and can be used once. If you didn't ask, you can ignore this message.\n"
        ),
    }
}

/// Sent to the address being confirmed, not the current one.
pub(super) fn email_change_email(
    config: &AuthConfig,
    new_email: &str,
    username: &str,
    token: &str,
) -> EmailMessage {
    let link = build_email_change_url(config.public_base_url(), token);
    let ttl_hours = config.verification_ttl_hours(VerificationKind::EmailChange);
    EmailMessage {
        from_email: config.email_from().to_string(),
        to_email: new_email.to_string(),
        subject: "Confirm your new email address".to_string(),
        body: format!(
            "Hi {username},\n\nConfirm that this is your new address for the team hub:\n\n\
             {link}\n\nThe link expires in {ttl_hours} hours. If you didn't request this \
             change, you can ignore this message.\n"
        ),
    }
}

pub(super) fn account_deletion_email(
    config: &AuthConfig,
    to_email: &str,
    username: &str,
    token: &str,
) -> EmailMessage {
    let link = build_account_deletion_url(config.public_base_url(), token);
    let ttl_hours = config.verification_ttl_hours(VerificationKind::AccountDeletion);
    EmailMessage {
        from_email: config.email_from().to_string(),
        to_email: to_email.to_string(),
        subject: "Confirm account deletion".to_string(),
        body: format!(
            "Hi {username},\n\nClick the link below to permanently delete your account and \
             all of its data. This cannot be undone.\n\n{link}\n\nThe link expires in \
             {ttl_hours} hours. If you didn't request this, you can ignore this message.\n"
        ),
    }
}

fn contact_change_notice(
    config: &AuthConfig,
    before: &storage::ContactSnapshot,
    update: &ContactUpdate,
    admin_username: &str,
) -> EmailMessage {
    let mut changes = Vec::new();
    if let Some(username) = update.username.as_deref() {
        if username != before.username {
            changes.push(format!("username: {} is now {username}", before.username));
        }
    }
    if let Some(email) = update.email.as_deref() {
        if email != before.email {
            changes.push(format!("email: {} is now {email}", before.email));
        }
    }

    EmailMessage {
        from_email: config.email_from().to_string(),
        to_email: before.email.clone(),
        subject: "Your account details were updated".to_string(),
        body: format!(
            "Hi {},\n\nA team admin ({admin_username}) updated your account:\n\n{}\n\nIf this \
             is unexpected, contact your team admin.\n",
            before.username,
            changes.join("\n")
        ),
    }
}
