//! Interaction throttle for remote sessions.
//!
//! Decides whether a write action (message, plan approval) may be sent to a
//! session right now. The decision is computed fresh from caller-supplied
//! snapshots; persisting `last_interaction_at` is the caller's job.
//!
//! Rules, in order:
//! 1. Never interacted: allow.
//! 2. Less than `min_interval` since our last action: deny.
//! 3. Remote side updated after our last action: allow.
//! 4. More than `retry_timeout` since our last action: allow (nudge).
//! 5. Otherwise deny.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::id::now_ms;

/// Fallback minimum interval between our actions, in seconds.
pub const DEFAULT_MIN_INTERACTION_INTERVAL_SECS: u64 = 60;

/// Fallback silence after which a nudge is allowed, in seconds.
pub const DEFAULT_RETRY_TIMEOUT_SECS: u64 = 1200;

/// Throttle intervals, both in seconds. Zero means "use the default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    pub min_session_interaction_interval: u64,
    pub retry_timeout: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            min_session_interaction_interval: DEFAULT_MIN_INTERACTION_INTERVAL_SECS,
            retry_timeout: DEFAULT_RETRY_TIMEOUT_SECS,
        }
    }
}

impl ThrottleSettings {
    fn min_interval_ms(&self) -> u64 {
        or_default(self.min_session_interaction_interval, DEFAULT_MIN_INTERACTION_INTERVAL_SECS).saturating_mul(1000)
    }

    fn retry_timeout_ms(&self) -> u64 {
        or_default(self.retry_timeout, DEFAULT_RETRY_TIMEOUT_SECS).saturating_mul(1000)
    }
}

fn or_default(value: u64, default: u64) -> u64 {
    if value == 0 { default } else { value }
}

/// What the throttle needs to know about one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    /// Epoch millis of our last write action, 0 if never.
    #[serde(default)]
    pub last_interaction_at: u64,
    /// Remote last-modified time, ISO-8601.
    #[serde(default)]
    pub update_time: Option<String>,
}

impl SessionSnapshot {
    pub fn new(id: impl Into<String>, last_interaction_at: u64, update_time: Option<String>) -> Self {
        Self {
            id: id.into(),
            last_interaction_at,
            update_time,
        }
    }

    /// Whether an action may be sent to this session now.
    pub fn should_interact(&self, settings: &ThrottleSettings) -> bool {
        should_interact_at(now_ms(), self.last_interaction_at, self.update_time.as_deref(), settings)
    }
}

/// Parse an ISO-8601 / RFC 3339 timestamp into epoch millis.
pub fn parse_update_time(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|t| t.timestamp_millis())
}

/// Throttle decision against the current wall clock.
pub fn should_interact(
    last_interaction_at: u64,
    update_time: Option<&str>,
    min_session_interaction_interval: u64,
    retry_timeout: u64,
) -> bool {
    let settings = ThrottleSettings {
        min_session_interaction_interval,
        retry_timeout,
    };
    should_interact_at(now_ms(), last_interaction_at, update_time, &settings)
}

/// Throttle decision against an explicit clock reading `now` (epoch millis).
pub fn should_interact_at(
    now: u64,
    last_interaction_at: u64,
    update_time: Option<&str>,
    settings: &ThrottleSettings,
) -> bool {
    if last_interaction_at == 0 {
        return true;
    }

    let elapsed = now.saturating_sub(last_interaction_at);
    if elapsed < settings.min_interval_ms() {
        return false;
    }

    // Unparseable timestamps count as no remote activity
    let remote_update = update_time.and_then(parse_update_time);
    if remote_update.is_some_and(|t| i64::try_from(last_interaction_at).is_ok_and(|last| t > last)) {
        return true;
    }

    elapsed > settings.retry_timeout_ms()
}
