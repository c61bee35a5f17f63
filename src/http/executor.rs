//! Resilient request executor
//!
//! Runs one logical request as a bounded sequence of attempts. Retryable
//! failures (5xx, 429, transport errors) are retried with backoff; every
//! wait point watches the request's cancellation token so `cancel` takes
//! effect mid-sleep rather than at the next attempt.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::error::{LastFailure, RequestError, TransportError};
use super::gate::{GateConfig, RequestGate};
use super::observer::{DEFAULT_BODY_LOG_LIMIT, FailureReport, RequestObserver, RetryEvent, TracingObserver, excerpt};
use super::registry::InFlightRegistry;
use super::retry::{RetryPolicy, StatusClass, classify_status, parse_retry_after};
use super::transport::{HttpResponse, HttpTransport, RequestDescriptor};
use crate::config::Config;

/// Per-attempt timeout when the descriptor sets none
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes requests against an `HttpTransport` with retries and cancellation
///
/// Cloning is cheap and clones share the registry and gate, so `cancel`
/// called on any clone reaches requests started on another.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    gate: RequestGate,
    registry: InFlightRegistry,
    observer: Arc<dyn RequestObserver>,
    default_timeout: Duration,
    body_log_limit: usize,
}

impl Executor {
    /// Executor with default policy, default gate and tracing diagnostics
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
            gate: RequestGate::default(),
            registry: InFlightRegistry::new(),
            observer: Arc::new(TracingObserver),
            default_timeout: DEFAULT_TIMEOUT,
            body_log_limit: DEFAULT_BODY_LOG_LIMIT,
        }
    }

    /// Executor wired from the `http` and `gate` config sections
    pub fn from_config(transport: Arc<dyn HttpTransport>, config: &Config) -> Self {
        Self::new(transport)
            .with_policy(config.http.retry_policy())
            .with_gate(config.gate.gate_config())
            .with_default_timeout(Duration::from_millis(config.http.timeout_ms))
            .with_body_log_limit(config.http.body_log_limit)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_gate(mut self, config: GateConfig) -> Self {
        self.gate = RequestGate::new(config);
        self
    }

    pub fn with_registry(mut self, registry: InFlightRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_body_log_limit(mut self, limit: usize) -> Self {
        self.body_log_limit = limit;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    /// Number of keyed requests currently in flight
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Perform `request`, retrying retryable failures
    ///
    /// Returns the first response whose status is below 400. A 4xx other
    /// than 429 fails immediately with `NonRetryableHttp`.
    pub async fn execute(&self, request: RequestDescriptor) -> Result<HttpResponse, RequestError> {
        let registration = request
            .request_id
            .as_deref()
            .map(|id| self.registry.register(id, request.cancel_token.as_ref()));

        let cancel = match (&registration, &request.cancel_token) {
            (Some(registration), _) => registration.token().clone(),
            (None, Some(token)) => token.clone(),
            (None, None) => CancellationToken::new(),
        };

        let result = self.run(&request, &cancel).await;
        if let Err(err) = &result {
            self.report_failure(&request, err);
        }

        drop(registration);
        result
    }

    /// Abort the in-flight request registered under `request_id`
    ///
    /// Unknown or already-finished ids are ignored; repeated calls are harmless.
    pub fn cancel(&self, request_id: &str) {
        if !self.registry.cancel(request_id) {
            tracing::debug!(request_id, "Cancel ignored, no request in flight");
        }
    }

    /// Clear registry and gate bookkeeping between test cases
    ///
    /// Does not cancel anything. Production code never needs this.
    pub fn reset_registry(&self) {
        self.registry.reset();
        self.gate.reset();
    }

    async fn run(&self, request: &RequestDescriptor, cancel: &CancellationToken) -> Result<HttpResponse, RequestError> {
        let max_attempts = self.policy.attempts_for(request.retries);
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let aborted = || RequestError::Aborted {
            request_id: request.request_id.clone(),
        };

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(aborted());
            }
            let Some(permit) = self.gate.admit(cancel).await else {
                return Err(aborted());
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(aborted()),
                result = tokio::time::timeout(timeout, self.transport.send(request)) => match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TransportError::Timeout(format!("no response within {}ms", timeout.as_millis()))),
                },
            };
            drop(permit);
            attempt += 1;

            let (failure, retry_after) = match outcome {
                Ok(response) => match classify_status(response.status) {
                    StatusClass::Success => {
                        self.gate.report_success();
                        return Ok(response);
                    }
                    StatusClass::NonRetryable => {
                        return Err(RequestError::NonRetryableHttp {
                            url: request.url.clone(),
                            status: response.status,
                            body: excerpt(&response.body, self.body_log_limit),
                        });
                    }
                    StatusClass::Retryable => {
                        let retry_after = response
                            .retry_after()
                            .and_then(|value| parse_retry_after(value, Utc::now()));
                        if response.status == 429 {
                            self.gate.report_rate_limit(retry_after);
                        }
                        let failure = LastFailure::Status {
                            status: response.status,
                            body: excerpt(&response.body, self.body_log_limit),
                        };
                        (failure, retry_after)
                    }
                },
                Err(err) => (LastFailure::Transport(err), None),
            };

            if attempt >= max_attempts {
                let url = request.url.clone();
                return Err(match failure {
                    LastFailure::Transport(source) => RequestError::Transport {
                        url,
                        attempts: attempt,
                        source,
                    },
                    last => RequestError::Exhausted {
                        url,
                        attempts: attempt,
                        last,
                    },
                });
            }

            let delay = self.policy.delay_for(attempt - 1, retry_after);
            self.observer.on_retry(&RetryEvent {
                url: &request.url,
                request_id: request.request_id.as_deref(),
                attempt,
                max_attempts,
                delay,
                failure: &failure,
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(aborted()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn report_failure(&self, request: &RequestDescriptor, error: &RequestError) {
        if error.is_aborted() {
            tracing::debug!(url = %request.url, request_id = request.request_id.as_deref(), "Request aborted");
            return;
        }

        let body_excerpt = request
            .body
            .as_deref()
            .map(|body| excerpt(body, self.body_log_limit))
            .unwrap_or_default();

        self.observer.on_failure(&FailureReport {
            method: request.method.as_str(),
            url: &request.url,
            request_id: request.request_id.as_deref(),
            error,
            body_excerpt,
        });
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("policy", &self.policy)
            .field("gate", self.gate.config())
            .field("in_flight", &self.registry.len())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockTransport;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingObserver {
        retries: Mutex<Vec<(u32, Duration)>>,
        failures: Mutex<Vec<(String, String, String)>>,
    }

    impl RequestObserver for RecordingObserver {
        fn on_retry(&self, event: &RetryEvent<'_>) {
            self.retries.lock().unwrap().push((event.attempt, event.delay));
        }

        fn on_failure(&self, report: &FailureReport<'_>) {
            self.failures.lock().unwrap().push((
                report.error.kind().to_string(),
                report.url.to_string(),
                report.body_excerpt.clone(),
            ));
        }
    }

    fn executor(mock: &MockTransport) -> Executor {
        Executor::new(Arc::new(mock.clone()))
            .with_policy(RetryPolicy::default().without_jitter())
            .with_gate(GateConfig::unrestricted())
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let mock = MockTransport::with_statuses(&[200]);
        let exec = executor(&mock);

        let resp = exec.execute(RequestDescriptor::get("https://example.com")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redirect_status_is_returned() {
        let mock = MockTransport::with_statuses(&[304]);
        let exec = executor(&mock);

        let resp = exec.execute(RequestDescriptor::get("https://example.com")).await.unwrap();
        assert_eq!(resp.status, 304);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_5xx_then_succeeds() {
        let mock = MockTransport::with_statuses(&[500, 502, 503, 200]);
        let exec = executor(&mock);

        let resp = exec
            .execute(RequestDescriptor::get("https://example.com").with_retries(4))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_between_attempts() {
        let mock = MockTransport::with_statuses(&[500, 500, 200]);
        let observer = Arc::new(RecordingObserver::default());
        let exec = executor(&mock).with_observer(observer.clone());

        exec.execute(RequestDescriptor::get("https://example.com")).await.unwrap();

        let retries = observer.retries.lock().unwrap().clone();
        assert_eq!(
            retries,
            vec![(1, Duration::from_millis(500)), (2, Duration::from_millis(1000))]
        );

        let calls = mock.calls();
        assert!(calls[1].at - calls[0].at >= Duration::from_millis(500));
        assert!(calls[2].at - calls[1].at >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_persistent_500() {
        let mock = MockTransport::new();
        mock.set_fallback(Ok(HttpResponse::new(500).with_body("boom")));
        let observer = Arc::new(RecordingObserver::default());
        let exec = executor(&mock).with_observer(observer.clone());

        let err = exec
            .execute(RequestDescriptor::get("https://example.com/s").with_retries(3))
            .await
            .unwrap_err();

        match err {
            RequestError::Exhausted { url, attempts, last } => {
                assert_eq!(url, "https://example.com/s");
                assert_eq!(attempts, 3);
                assert_eq!(
                    last,
                    LastFailure::Status {
                        status: 500,
                        body: "boom".to_string()
                    }
                );
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert_eq!(mock.call_count(), 3);
        assert_eq!(observer.failures.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_4xx_fails_immediately() {
        let mock = MockTransport::new();
        mock.push_response(HttpResponse::new(404).with_body("not found"));
        let exec = executor(&mock);

        let err = exec
            .execute(RequestDescriptor::get("https://example.com/missing"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RequestError::NonRetryableHttp { status: 404, ref body, .. } if body == "not found"
        ));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honored() {
        let mock = MockTransport::new();
        mock.push_response(HttpResponse::new(429).with_header("retry-after", "7"));
        mock.push_response(HttpResponse::new(200));
        let exec = executor(&mock);

        exec.execute(RequestDescriptor::get("https://example.com")).await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].at - calls[0].at >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_opens_shared_backoff() {
        let mock = MockTransport::new();
        mock.push_response(HttpResponse::new(429));
        let exec = Executor::new(Arc::new(mock.clone()))
            .with_policy(RetryPolicy::new(1, Duration::from_millis(500), Duration::from_secs(30), 0.0))
            .with_gate(GateConfig {
                max_concurrent: 5,
                min_request_interval: Duration::ZERO,
                rate_limit_backoff: Duration::from_secs(5),
            });

        let err = exec.execute(RequestDescriptor::get("https://example.com/a")).await.unwrap_err();
        assert!(matches!(err, RequestError::Exhausted { .. }));
        assert!(exec.gate().is_rate_limited());

        // A sibling request waits out the window opened by the 429
        let start = Instant::now();
        exec.execute(RequestDescriptor::get("https://example.com/b")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_then_success() {
        let mock = MockTransport::new();
        mock.push_error(TransportError::Connect("connection reset".to_string()));
        mock.push_response(HttpResponse::new(200));
        let exec = executor(&mock);

        let resp = exec.execute(RequestDescriptor::get("https://example.com")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_on_final_attempt() {
        let mock = MockTransport::new();
        mock.set_fallback(Err(TransportError::Connect("refused".to_string())));
        let exec = executor(&mock);

        let err = exec
            .execute(RequestDescriptor::get("https://example.com").with_retries(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Transport { attempts: 2, .. }));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        let mock = MockTransport::new().with_latency(Duration::from_secs(10));
        let exec = executor(&mock);

        let err = exec
            .execute(
                RequestDescriptor::get("https://example.com")
                    .with_retries(2)
                    .with_timeout(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::Transport {
                source: TransportError::Timeout(_),
                ..
            }
        ));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_attempts_once() {
        let mock = MockTransport::with_statuses(&[503]);
        let exec = executor(&mock);

        let err = exec
            .execute(RequestDescriptor::get("https://example.com").with_retries(0))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Exhausted { attempts: 1, .. }));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let mock = MockTransport::new();
        mock.set_fallback(Ok(HttpResponse::new(503)));
        let exec = executor(&mock).with_policy(RetryPolicy::new(
            5,
            Duration::from_secs(60),
            Duration::from_secs(60),
            0.0,
        ));

        let task = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.execute(RequestDescriptor::get("https://example.com").with_request_id("job-1"))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(mock.call_count(), 1);
        assert_eq!(exec.in_flight(), 1);

        let start = Instant::now();
        exec.cancel("job-1");
        let err = task.await.unwrap().unwrap_err();

        assert!(matches!(err, RequestError::Aborted { request_id: Some(ref id) } if id == "job-1"));
        assert!(start.elapsed() < Duration::from_secs(60));
        assert_eq!(mock.call_count(), 1);
        assert_eq!(exec.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_transport_call() {
        let mock = MockTransport::new().with_latency(Duration::from_secs(20));
        let exec = executor(&mock);

        let task = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.execute(RequestDescriptor::get("https://example.com").with_request_id("slow"))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        exec.cancel("slow");
        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_token_aborts_unkeyed_request() {
        let mock = MockTransport::new();
        mock.set_fallback(Ok(HttpResponse::new(500)));
        let exec = executor(&mock);
        let token = CancellationToken::new();
        token.cancel();

        let err = exec
            .execute(RequestDescriptor::get("https://example.com").with_cancel_token(token))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Aborted { request_id: None }));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unknown_and_completed_ids_are_noops() {
        let mock = MockTransport::with_statuses(&[200]);
        let exec = executor(&mock);

        exec.cancel("never-started");

        exec.execute(RequestDescriptor::get("https://example.com").with_request_id("done"))
            .await
            .unwrap();
        assert_eq!(exec.in_flight(), 0);

        exec.cancel("done");
        exec.cancel("done");
        assert_eq!(exec.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_entry_removed_after_failure() {
        let mock = MockTransport::with_statuses(&[400]);
        let exec = executor(&mock);

        let _ = exec
            .execute(RequestDescriptor::get("https://example.com").with_request_id("bad"))
            .await;
        assert_eq!(exec.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_report_bounds_body() {
        let mock = MockTransport::with_statuses(&[422]);
        let observer = Arc::new(RecordingObserver::default());
        let exec = executor(&mock).with_observer(observer.clone()).with_body_log_limit(10);

        let body = "a".repeat(100);
        let _ = exec
            .execute(RequestDescriptor::post("https://example.com/x").with_body(body))
            .await;

        let failures = observer.failures.lock().unwrap().clone();
        assert_eq!(failures.len(), 1);
        let (kind, url, excerpt) = &failures[0];
        assert_eq!(kind, "non_retryable_http");
        assert_eq!(url, "https://example.com/x");
        assert!(excerpt.starts_with("aaaaaaaaaa..."));
        assert!(excerpt.len() < 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_is_not_reported_as_failure() {
        let mock = MockTransport::new();
        let observer = Arc::new(RecordingObserver::default());
        let exec = executor(&mock).with_observer(observer.clone());
        let token = CancellationToken::new();
        token.cancel();

        let _ = exec
            .execute(RequestDescriptor::get("https://example.com").with_cancel_token(token))
            .await;
        assert!(observer.failures.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_registry_clears_entries() {
        let mock = MockTransport::new().with_latency(Duration::from_secs(5));
        let exec = executor(&mock);

        let task = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.execute(RequestDescriptor::get("https://example.com").with_request_id("r"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(exec.in_flight(), 1);

        exec.reset_registry();
        assert_eq!(exec.in_flight(), 0);

        // Reset does not cancel; the request still completes
        assert!(task.await.unwrap().is_ok());
    }
}
