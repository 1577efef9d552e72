//! Shared helpers for the account endpoints: token generation and hashing,
//! input normalization, client IP extraction, and link building.

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Session tokens are 32 random bytes, hex-encoded (64 characters on the wire).
pub(super) const SESSION_TOKEN_BYTES: usize = 32;

/// CSRF secrets ride in a readable cookie; 16 bytes is plenty for equality checks.
pub(super) const CSRF_SECRET_BYTES: usize = 16;

/// One-time verification tokens are emailed as URLs; same width as sessions.
pub(super) const VERIFICATION_TOKEN_BYTES: usize = 32;

/// Minimum accepted password length, applied at registration and reset.
pub(super) const MIN_PASSWORD_LENGTH: usize = 8;

/// Generate a hex-encoded token from `byte_length` CSPRNG bytes.
pub(super) fn random_token(byte_length: usize) -> Result<String> {
    let mut bytes = vec![0u8; byte_length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("Failed to generate random token")?;
    Ok(hex::encode(bytes))
}

/// SHA-256 digest of a token, hex-encoded. Session tokens are stored as this
/// digest so the raw cookie value never reaches the database.
pub(super) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

pub(crate) fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Usernames are lowercase alphanumerics plus underscore, 3 to 32 characters.
pub(crate) fn valid_username(username: &str) -> bool {
    Regex::new(r"^[a-z0-9_]{3,32}$").is_ok_and(|re| re.is_match(username))
}

/// Trim an optional field, mapping empty strings to `None`.
pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim().to_string();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    })
}

/// Best-effort client IP: first hop of `X-Forwarded-For`, then `X-Real-Ip`.
/// The service is expected to sit behind a proxy that sets one of these.
pub(super) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// True when the error is a Postgres unique constraint violation (SQLSTATE 23505).
pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}

/// Link for the emailed "verify your address" button. Points at the service
/// itself; the handler redirects to the frontend once the token is consumed.
pub(super) fn build_email_verify_url(public_base_url: &str, token: &str) -> String {
    format!(
        "{}/api/auth/email/verify?token={token}",
        public_base_url.trim_end_matches('/')
    )
}

pub(super) fn build_email_change_url(public_base_url: &str, token: &str) -> String {
    format!(
        "{}/api/auth/email/change/confirm?token={token}",
        public_base_url.trim_end_matches('/')
    )
}

pub(super) fn build_account_deletion_url(public_base_url: &str, token: &str) -> String {
    format!(
        "{}/api/auth/account-deletion/confirm?token={token}",
        public_base_url.trim_end_matches('/')
    )
}

/// Password reset links go straight to the frontend form. The token rides in
/// the URL fragment, which browsers keep out of request lines and logs.
pub(super) fn build_password_reset_url(frontend_base_url: &str, token: &str) -> String {
    format!(
        "{}/reset-password#token={token}",
        frontend_base_url.trim_end_matches('/')
    )
}

pub(super) fn frontend_redirect(frontend_base_url: &str, path_and_query: &str) -> String {
    format!("{}{path_and_query}", frontend_base_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashSet;

    #[test]
    fn test_random_token_is_hex_of_requested_width() -> Result<()> {
        let token = random_token(SESSION_TOKEN_BYTES)?;
        assert_eq!(token.len(), SESSION_TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        Ok(())
    }

    #[test]
    fn test_random_tokens_do_not_repeat() -> Result<()> {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let token = random_token(SESSION_TOKEN_BYTES)?;
            assert!(seen.insert(token), "generated a duplicate token");
        }
        Ok(())
    }

    #[test]
    fn test_hash_token_differs_from_raw_and_is_stable() {
        let token = "a1b2c3d4";
        let digest = hash_token(token);
        assert_ne!(digest, token);
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hash_token(token));
        // Known SHA-256 vector
        assert_eq!(
            hash_token(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Player@Example.COM  "), "player@example.com");
    }

    #[test]
    fn test_valid_email() {
        assert!(valid_email("tracer@example.com"));
        assert!(valid_email("dva+main@team.gg"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing@tld"));
        assert!(!valid_email("spaces in@example.com"));
        assert!(!valid_email(""));
    }

    #[test]
    fn test_valid_username() {
        assert!(valid_username("tracer"));
        assert!(valid_username("main_tank_99"));
        assert!(!valid_username("ab"));
        assert!(!valid_username("UpperCase"));
        assert!(!valid_username("has-dash"));
        assert!(!valid_username(&"x".repeat(33)));
    }

    #[test]
    fn test_normalize_optional() {
        assert_eq!(normalize_optional(None), None);
        assert_eq!(normalize_optional(Some("  ".to_string())), None);
        assert_eq!(
            normalize_optional(Some("  Widowmaker  ".to_string())),
            Some("Widowmaker".to_string())
        );
    }

    #[test]
    fn test_extract_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), Some("203.0.113.7".to_string()));
    }

    #[test]
    fn test_extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), Some("198.51.100.2".to_string()));
    }

    #[test]
    fn test_extract_client_ip_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);
    }

    #[test]
    fn test_link_builders_trim_trailing_slash() {
        assert_eq!(
            build_email_verify_url("https://hub.example.gg/", "t0k3n"),
            "https://hub.example.gg/api/auth/email/verify?token=t0k3n"
        );
        assert_eq!(
            build_password_reset_url("https://hub.example.gg", "t0k3n"),
            "https://hub.example.gg/reset-password#token=t0k3n"
        );
        assert_eq!(
            build_email_change_url("http://localhost:8080", "abc"),
            "http://localhost:8080/api/auth/email/change/confirm?token=abc"
        );
        assert_eq!(
            build_account_deletion_url("http://localhost:8080", "abc"),
            "http://localhost:8080/api/auth/account-deletion/confirm?token=abc"
        );
        assert_eq!(
            frontend_redirect("http://localhost:3000/", "/login?verified=1"),
            "http://localhost:3000/login?verified=1"
        );
    }

    #[test]
    fn test_is_unique_violation() {
        #[derive(Debug)]
        struct TestDbError(String);

        impl std::fmt::Display for TestDbError {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::error::Error for TestDbError {}

        impl sqlx::error::DatabaseError for TestDbError {
            fn message(&self) -> &str {
                &self.0
            }

            fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
                Some(std::borrow::Cow::Borrowed("23505"))
            }

            fn kind(&self) -> sqlx::error::ErrorKind {
                sqlx::error::ErrorKind::UniqueViolation
            }

            fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
                self
            }

            fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
                self
            }

            fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
                self
            }
        }

        let unique = sqlx::Error::Database(Box::new(TestDbError("duplicate key".to_string())));
        assert!(is_unique_violation(&unique));

        let other = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&other));
    }
}
