//! Admission control in front of the transport.
//!
//! Every attempt of every request passes through one `RequestGate` before
//! it reaches the transport. The gate enforces three things:
//! - at most `max_concurrent` transport calls in flight
//! - a minimum spacing between two call starts
//! - a shared backoff window opened by any 429, so one rate-limited request
//!   holds back its siblings instead of letting them hammer the API too

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::retry::MAX_RETRY_AFTER;

/// Rate limit state shared by all requests going through one gate.
#[derive(Debug, Default)]
pub struct RateLimitState {
    /// When calls may resume (None = no active limit).
    pub backoff_until: Option<Instant>,
    /// Number of consecutive rate limit hits.
    pub consecutive_hits: u32,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if we are currently rate limited.
    pub fn is_rate_limited(&self) -> bool {
        self.remaining_backoff().is_some()
    }

    /// Get remaining backoff duration if rate limited.
    pub fn remaining_backoff(&self) -> Option<Duration> {
        self.backoff_until.and_then(|until| {
            let now = Instant::now();
            if now < until { Some(until - now) } else { None }
        })
    }

    /// Record a rate limit response.
    ///
    /// The window is the server's `Retry-After` when given, else `fallback`.
    /// An earlier, longer window is never shortened. Windows longer than
    /// `MAX_RETRY_AFTER` are clamped.
    pub fn record_rate_limit(&mut self, retry_after: Option<Duration>, fallback: Duration) {
        self.consecutive_hits = self.consecutive_hits.saturating_add(1);

        let delay = retry_after
            .filter(|d| !d.is_zero())
            .unwrap_or(fallback)
            .min(MAX_RETRY_AFTER);
        let now = Instant::now();
        let until = now.checked_add(delay).unwrap_or(now);
        self.backoff_until = Some(self.backoff_until.map_or(until, |current| current.max(until)));

        tracing::warn!(
            backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            consecutive_hits = self.consecutive_hits,
            "Rate limited, backing off globally"
        );
    }

    /// Record a successful call. Resets the consecutive hit counter.
    pub fn record_success(&mut self) {
        self.consecutive_hits = 0;
    }

    /// Reset the rate limit state.
    pub fn reset(&mut self) {
        self.backoff_until = None;
        self.consecutive_hits = 0;
    }
}

/// Gate configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Max concurrent transport calls.
    pub max_concurrent: usize,
    /// Minimum time between two call starts.
    pub min_request_interval: Duration,
    /// Backoff window after a 429 that carries no `Retry-After`.
    pub rate_limit_backoff: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            min_request_interval: Duration::from_millis(200),
            rate_limit_backoff: Duration::from_secs(5),
        }
    }
}

impl GateConfig {
    /// No concurrency cap worth mentioning, no spacing.
    pub fn unrestricted() -> Self {
        Self {
            max_concurrent: Semaphore::MAX_PERMITS,
            min_request_interval: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    last_start: Option<Instant>,
    rate_limit: RateLimitState,
}

/// Held while one transport call is in flight.
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Process-wide admission control for outbound calls.
#[derive(Debug, Clone)]
pub struct RequestGate {
    config: GateConfig,
    semaphore: Arc<Semaphore>,
    state: Arc<Mutex<GateState>>,
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

impl RequestGate {
    pub fn new(config: GateConfig) -> Self {
        let permits = config.max_concurrent.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            state: Arc::new(Mutex::new(GateState::default())),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Wait for a slot, spacing and any rate limit window.
    ///
    /// Returns `None` if `cancel` fires first.
    pub async fn admit(&self, cancel: &CancellationToken) -> Option<GatePermit> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        };

        loop {
            let wait = {
                let mut state = self.lock();
                let now = Instant::now();
                let spacing = state
                    .last_start
                    .map(|last| (last + self.config.min_request_interval).saturating_duration_since(now))
                    .unwrap_or(Duration::ZERO);
                let backoff = state.rate_limit.remaining_backoff().unwrap_or(Duration::ZERO);
                let wait = spacing.max(backoff);
                if wait.is_zero() {
                    state.last_start = Some(now);
                }
                wait
            };

            if wait.is_zero() {
                return Some(GatePermit { _permit: permit });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Open (or extend) the shared backoff window after a 429.
    pub fn report_rate_limit(&self, retry_after: Option<Duration>) {
        let fallback = self.config.rate_limit_backoff;
        self.lock().rate_limit.record_rate_limit(retry_after, fallback);
    }

    pub fn report_success(&self) {
        self.lock().rate_limit.record_success();
    }

    pub fn is_rate_limited(&self) -> bool {
        self.lock().rate_limit.is_rate_limited()
    }

    pub fn consecutive_rate_limits(&self) -> u32 {
        self.lock().rate_limit.consecutive_hits
    }

    /// Forget spacing and backoff history. Test isolation only.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.last_start = None;
        state.rate_limit.reset();
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
