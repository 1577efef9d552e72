//! Transactional email delivery through a database outbox.
//!
//! Handlers never send email directly. They enqueue a row in `email_outbox`
//! inside their own transaction, so the email intent commits atomically with
//! the state change that caused it. A background worker drains the queue,
//! retrying failures with jittered exponential backoff. Multiple instances
//! can run the worker concurrently; `FOR UPDATE SKIP LOCKED` keeps them off
//! each other's batches.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_BATCH_SIZE: usize = 20;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(5);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(300);

/// One outgoing email.
#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub from_email: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

/// Delivery backend. Implementations talk to SMTP or an email API.
pub trait EmailSender: Send + Sync {
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Sender that only logs. Stands in until a real backend is wired up; the
/// outbox contract is the same either way.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to_email,
            subject = %message.subject,
            "Email ready for delivery"
        );
        Ok(())
    }
}

/// Tuning for the outbox worker.
#[derive(Clone, Debug)]
pub struct EmailWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl EmailWorkerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    #[must_use]
    pub fn with_backoff_max(mut self, backoff_max: Duration) -> Self {
        self.backoff_max = backoff_max;
        self
    }

    /// Clamp out-of-range values rather than failing startup over a typo.
    #[must_use]
    fn normalize(mut self) -> Self {
        if self.poll_interval < Duration::from_millis(100) {
            self.poll_interval = Duration::from_millis(100);
        }
        if self.batch_size == 0 {
            self.batch_size = 1;
        }
        if self.max_attempts == 0 {
            self.max_attempts = 1;
        }
        if self.backoff_base.is_zero() {
            self.backoff_base = Duration::from_secs(1);
        }
        if self.backoff_max < self.backoff_base {
            self.backoff_max = self.backoff_base;
        }
        self
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the outbox worker. It runs until the process exits.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    let config = config.normalize();
    tokio::spawn(async move {
        info!("Email outbox worker started");
        loop {
            match process_outbox_batch(&pool, sender.as_ref(), &config).await {
                Ok(0) => {}
                Ok(count) => debug!("Processed {count} outbox emails"),
                Err(err) => error!("Outbox pass failed: {err:#}"),
            }
            tokio::time::sleep(config.poll_interval()).await;
        }
    })
}

/// Claim a batch of due emails and try to deliver each one. Claims and
/// status updates commit together, so a crashed pass leaves the rows
/// untouched for the next one.
async fn process_outbox_batch(
    pool: &PgPool,
    sender: &dyn EmailSender,
    config: &EmailWorkerConfig,
) -> Result<usize> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let query = r"
        SELECT id, from_email, to_email, subject, body, attempts
        FROM email_outbox
        WHERE status = 'pending'
          AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at, created_at
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );

    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(1))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("Failed to claim outbox batch")?;

    if rows.is_empty() {
        tx.commit().await.context("Failed to commit transaction")?;
        return Ok(0);
    }

    let max_attempts = i32::try_from(config.max_attempts()).unwrap_or(i32::MAX);
    let mut processed = 0;

    for row in rows {
        let id: Uuid = row.get("id");
        let previous_attempts: i32 = row.get("attempts");
        let message = EmailMessage {
            from_email: row.get("from_email"),
            to_email: row.get("to_email"),
            subject: row.get("subject"),
            body: row.get("body"),
        };

        match sender.send(&message) {
            Ok(()) => mark_sent(&mut tx, id).await?,
            Err(err) => {
                let attempt = previous_attempts.saturating_add(1);
                let reason = format!("{err:#}");
                if attempt >= max_attempts {
                    error!(outbox_id = %id, "Giving up on email after {attempt} attempts: {reason}");
                    mark_failed(&mut tx, id, &reason).await?;
                } else {
                    let attempt_number = u32::try_from(attempt).unwrap_or(u32::MAX);
                    let delay = jitter_delay(backoff_delay(
                        config.backoff_base,
                        config.backoff_max,
                        attempt_number,
                    ));
                    schedule_retry(&mut tx, id, &reason, delay).await?;
                }
            }
        }
        processed += 1;
    }

    tx.commit().await.context("Failed to commit transaction")?;
    Ok(processed)
}

async fn mark_sent(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<()> {
    let query = r"
        UPDATE email_outbox
        SET status = 'sent', sent_at = NOW(), last_error = NULL
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    sqlx::query(query)
        .bind(id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to mark email sent")?;

    Ok(())
}

async fn mark_failed(tx: &mut Transaction<'_, Postgres>, id: Uuid, reason: &str) -> Result<()> {
    let query = r"
        UPDATE email_outbox
        SET status = 'failed', attempts = attempts + 1, last_error = $2
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    sqlx::query(query)
        .bind(id)
        .bind(reason)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to mark email failed")?;

    Ok(())
}

async fn schedule_retry(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    reason: &str,
    delay: Duration,
) -> Result<()> {
    let query = r"
        UPDATE email_outbox
        SET attempts = attempts + 1,
            last_error = $2,
            next_attempt_at = NOW() + ($3 * INTERVAL '1 millisecond')
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    sqlx::query(query)
        .bind(id)
        .bind(reason)
        .bind(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to schedule email retry")?;

    Ok(())
}

/// Doubling backoff, capped at `max`. The shift is clamped so absurd attempt
/// counts cannot overflow.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    base.saturating_mul(2u32.saturating_pow(shift)).min(max)
}

/// Half fixed, half random. Spreads retries from concurrent workers apart.
fn jitter_delay(delay: Duration) -> Duration {
    let half = delay / 2;
    half + delay.mul_f64(rand::random::<f64>() / 2.0)
}
