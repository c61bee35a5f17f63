//! Diagnostics hooks for the executor.
//!
//! The executor reports retries and terminal failures to a `RequestObserver`
//! instead of logging directly. `TracingObserver` is the default and turns
//! them into structured `tracing` events. Headers are never reported; the
//! request body only as a size-bounded excerpt.

use std::time::Duration;

use super::error::{LastFailure, RequestError};

/// Default number of body characters kept in failure reports.
pub const DEFAULT_BODY_LOG_LIMIT: usize = 200;

/// A retryable failure that is about to be retried.
#[derive(Debug, Clone)]
pub struct RetryEvent<'a> {
    pub url: &'a str,
    pub request_id: Option<&'a str>,
    /// 1-based number of the attempt that just failed
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub failure: &'a LastFailure,
}

/// A request that ended without a usable response.
#[derive(Debug)]
pub struct FailureReport<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub request_id: Option<&'a str>,
    pub error: &'a RequestError,
    /// Truncated request body, empty when the request had none
    pub body_excerpt: String,
}

/// Receives executor diagnostics. Implementations must not block.
pub trait RequestObserver: Send + Sync {
    fn on_retry(&self, event: &RetryEvent<'_>);

    fn on_failure(&self, report: &FailureReport<'_>);
}

/// Emits retries as `warn` and terminal failures as `error` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RequestObserver for TracingObserver {
    fn on_retry(&self, event: &RetryEvent<'_>) {
        tracing::warn!(
            url = event.url,
            request_id = event.request_id,
            attempt = event.attempt,
            max_attempts = event.max_attempts,
            delay_ms = u64::try_from(event.delay.as_millis()).unwrap_or(u64::MAX),
            failure = %event.failure,
            "Request failed, retrying"
        );
    }

    fn on_failure(&self, report: &FailureReport<'_>) {
        tracing::error!(
            kind = report.error.kind(),
            method = report.method,
            url = report.url,
            request_id = report.request_id,
            status = report.error.status(),
            body = %report.body_excerpt,
            error = %report.error,
            "Request failed"
        );
    }
}

/// First `limit` characters of `bytes` (lossy UTF-8), marking any cut.
pub fn excerpt(bytes: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let total = text.chars().count();
    if total <= limit {
        return text.into_owned();
    }
    let kept: String = text.chars().take(limit).collect();
    format!("{}... ({} more chars)", kept, total - limit)
}
