//! ID and clock utilities for sessionguard
//!
//! Provides the wall clock used by the throttle and helpers for building
//! request ids that callers can later pass to `Executor::cancel`.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Generate a unique request ID
///
/// Format: `{prefix}-{timestamp_ms}-{random_hex}`
/// Example: `fetch-1738300800123-a1b2c3d4`
pub fn generate_request_id(prefix: &str) -> String {
    let random: u32 = rand::rng().random();
    format!("{}-{}-{:08x}", prefix, now_ms(), random)
}

/// Request ID for a write action against one session
///
/// Format: `{action}:{session_id}`
/// Stable per session so a second action of the same kind supersedes the first.
pub fn action_request_id(action: &str, session_id: &str) -> String {
    format!("{}:{}", action, session_id)
}
