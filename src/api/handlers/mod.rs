//! API handlers for stackwatch.
//!
//! `auth` carries the account lifecycle: registration, login, sessions,
//! verification flows, and the abuse controls around them. `users` is the
//! roster administration surface, `cron` the scheduled cleanup hook, and
//! `health` the readiness probe.

pub mod auth;
pub mod cron;
pub mod health;
pub mod users;
