//! Retry classification and backoff computation.
//!
//! Status classes:
//! - below 400: success, handed back to the caller as-is
//! - 429 and 5xx: retryable
//! - any other 4xx: terminal, surfaced without consuming retries
//!
//! Delays honor `Retry-After` when the server sends one, otherwise grow as
//! `base * 2^attempt` plus jitter, capped at `max_delay`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Default attempt budget when a request does not set its own.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Backoff for the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound for computed backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Fraction of the computed delay added as random jitter.
pub const DEFAULT_JITTER: f64 = 0.1;

/// Longest `Retry-After` honored; larger server values are clamped to this.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// How the executor should treat a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Retryable,
    NonRetryable,
}

/// Classify an HTTP status code.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        429 => StatusClass::Retryable,
        s if s >= 500 => StatusClass::Retryable,
        s if s >= 400 => StatusClass::NonRetryable,
        _ => StatusClass::Success,
    }
}

/// Parse a `Retry-After` value.
///
/// Accepts delta-seconds (integer or fractional) and HTTP-dates. Dates in
/// the past and negative values collapse to zero; anything past
/// `MAX_RETRY_AFTER` is clamped to it. `inf` and `NaN` are rejected.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER));
    }

    if let Ok(secs) = value.parse::<f64>() {
        if !secs.is_finite() {
            return None;
        }
        let delay = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(MAX_RETRY_AFTER);
        return Some(delay.min(MAX_RETRY_AFTER));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO).min(MAX_RETRY_AFTER))
}

/// Backoff parameters shared by every request of one executor.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per request unless the descriptor overrides it.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling on computed delays (does not bound `Retry-After`).
    pub max_delay: Duration,
    /// Jitter fraction in [0, 1].
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Create policy with custom values.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter,
        }
    }

    /// Same policy without random jitter, for deterministic timing.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Attempt budget for a request, never below one.
    pub fn attempts_for(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.max_attempts).max(1)
    }

    /// Computed backoff for the retry following failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let base = self.base_delay.saturating_mul(factor);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let with_jitter = if jitter > 0.0 {
            let extra = rand::rng().random_range(0.0..=jitter);
            base.saturating_add(base.mul_f64(extra))
        } else {
            base
        };

        with_jitter.min(self.max_delay)
    }

    /// Delay before the next attempt; a server-supplied `Retry-After` wins.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(delay) => delay,
            None => self.backoff(attempt),
        }
    }
}
