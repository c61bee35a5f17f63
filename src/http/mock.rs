//! Scripted transport for tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::error::TransportError;
use super::transport::{HttpResponse, HttpTransport, RequestDescriptor};

pub type Scripted = Result<HttpResponse, TransportError>;

/// One recorded call to `MockTransport::send`
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: reqwest::Method,
    pub url: String,
    pub body: Option<Vec<u8>>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<Scripted>,
    fallback: Option<Scripted>,
    calls: Vec<RecordedCall>,
}

/// Returns scripted outcomes in order, then the fallback (200 if unset)
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a sequence of statuses with empty bodies
    pub fn with_statuses(statuses: &[u16]) -> Self {
        let mock = Self::new();
        for status in statuses {
            mock.push_response(HttpResponse::new(*status));
        }
        mock
    }

    /// Every call sleeps this long before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.lock().script.push_back(Ok(response));
    }

    pub fn push_error(&self, error: TransportError) {
        self.lock().script.push_back(Err(error));
    }

    /// Outcome returned once the script runs dry
    pub fn set_fallback(&self, outcome: Scripted) {
        self.lock().fallback = Some(outcome);
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse, TransportError> {
        let outcome = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                method: request.method.clone(),
                url: request.url.clone(),
                body: request.body.clone(),
                at: Instant::now(),
            });
            match state.script.pop_front() {
                Some(outcome) => outcome,
                None => state.fallback.clone().unwrap_or_else(|| Ok(HttpResponse::new(200))),
            }
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        outcome
    }
}
