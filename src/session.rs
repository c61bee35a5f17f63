//! Throttled write actions against remote sessions
//!
//! Every write goes through the interaction throttle first. When the
//! throttle says no, nothing is sent and `ActionOutcome::Throttled` comes
//! back; otherwise the call runs through the executor under a request id
//! derived from the action and session, so it can be cancelled.

use std::fmt;

use serde_json::json;

use crate::config::Config;
use crate::error::{Result, SessionGuardError};
use crate::http::{Executor, HttpResponse, RequestDescriptor};
use crate::id::action_request_id;
use crate::throttle::{SessionSnapshot, ThrottleSettings};

/// Header carrying the session API key
const API_KEY_HEADER: &str = "X-Goog-Api-Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    SendMessage,
    ApprovePlan,
}

impl SessionAction {
    /// Custom-method suffix used in the API path
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::SendMessage => "sendMessage",
            SessionAction::ApprovePlan => "approvePlan",
        }
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ActionOutcome {
    /// Throttle denied the action; nothing was sent
    Throttled,
    Sent(HttpResponse),
}

impl ActionOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, ActionOutcome::Sent(_))
    }
}

/// Client for session write actions
#[derive(Clone)]
pub struct SessionActions {
    executor: Executor,
    base_url: String,
    api_key: String,
    settings: ThrottleSettings,
}

impl SessionActions {
    pub fn new(
        executor: Executor,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        settings: ThrottleSettings,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(SessionGuardError::InvalidConfig(format!(
                "api.base_url must be an http(s) URL, got {:?}",
                base_url
            )));
        }

        Ok(Self {
            executor,
            base_url,
            api_key: api_key.into(),
            settings,
        })
    }

    /// Build from config; the API key comes from `api.api_key_env`
    pub fn from_config(executor: Executor, config: &Config) -> Result<Self> {
        let api_key = config.api_key()?;
        Self::new(executor, config.api.base_url.clone(), api_key, config.throttle)
    }

    pub fn settings(&self) -> &ThrottleSettings {
        &self.settings
    }

    /// Send a chat message to the session's agent
    pub async fn send_message(&self, session: &SessionSnapshot, text: &str) -> Result<ActionOutcome> {
        self.perform(session, SessionAction::SendMessage, Some(json!({ "prompt": text })))
            .await
    }

    /// Approve the plan the session's agent proposed
    pub async fn approve_plan(&self, session: &SessionSnapshot) -> Result<ActionOutcome> {
        self.perform(session, SessionAction::ApprovePlan, None).await
    }

    /// Abort an in-flight action, if any
    pub fn cancel(&self, action: SessionAction, session_id: &str) {
        self.executor.cancel(&action_request_id(action.as_str(), session_id));
    }

    pub fn action_url(&self, session_id: &str, action: SessionAction) -> String {
        format!("{}/sessions/{}:{}", self.base_url, session_id, action)
    }

    async fn perform(
        &self,
        session: &SessionSnapshot,
        action: SessionAction,
        body: Option<serde_json::Value>,
    ) -> Result<ActionOutcome> {
        validate_session_id(&session.id)?;

        if !session.should_interact(&self.settings) {
            tracing::info!(
                session_id = %session.id,
                action = action.as_str(),
                last_interaction_at = session.last_interaction_at,
                "Interaction throttled"
            );
            return Ok(ActionOutcome::Throttled);
        }

        let mut request = RequestDescriptor::post(self.action_url(&session.id, action))
            .with_header(API_KEY_HEADER, self.api_key.as_str())
            .with_request_id(action_request_id(action.as_str(), &session.id));
        if let Some(body) = body {
            request = request.with_json(&body)?;
        }

        let response = self.executor.execute(request).await?;
        tracing::info!(session_id = %session.id, action = action.as_str(), status = response.status, "Session action sent");
        Ok(ActionOutcome::Sent(response))
    }
}

// API key stays out of debug output
impl fmt::Debug for SessionActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionActions")
            .field("base_url", &self.base_url)
            .field("settings", &self.settings)
            .field("executor", &self.executor)
            .finish()
    }
}

/// Session ids become a URL path segment; allow only `[A-Za-z0-9_-]`
pub fn validate_session_id(id: &str) -> Result<()> {
    let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SessionGuardError::InvalidSessionId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{GateConfig, MockTransport, RequestError, RetryPolicy};
    use crate::id::now_ms;
    use std::sync::Arc;

    fn actions(mock: &MockTransport) -> SessionActions {
        let executor = Executor::new(Arc::new(mock.clone()))
            .with_policy(RetryPolicy::default().without_jitter())
            .with_gate(GateConfig::unrestricted());
        SessionActions::new(executor, "https://api.example.com/v1alpha/", "key", ThrottleSettings::default()).unwrap()
    }

    #[test]
    fn test_action_url() {
        let actions = actions(&MockTransport::new());
        assert_eq!(
            actions.action_url("abc", SessionAction::SendMessage),
            "https://api.example.com/v1alpha/sessions/abc:sendMessage"
        );
        assert_eq!(
            actions.action_url("abc", SessionAction::ApprovePlan),
            "https://api.example.com/v1alpha/sessions/abc:approvePlan"
        );
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let executor = Executor::new(Arc::new(MockTransport::new()));
        let err = SessionActions::new(executor, "ftp://example.com", "key", ThrottleSettings::default()).unwrap_err();
        assert!(matches!(err, SessionGuardError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("1234567890").is_ok());
        assert!(validate_session_id("abc-DEF_9").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../admin").is_err());
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id("a:b").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_first_interaction() {
        let mock = MockTransport::with_statuses(&[200]);
        let actions = actions(&mock);
        let session = SessionSnapshot::new("s1", 0, None);

        let outcome = actions.send_message(&session, "please continue").await.unwrap();
        assert!(outcome.is_sent());

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "https://api.example.com/v1alpha/sessions/s1:sendMessage");
        assert_eq!(calls[0].body.as_deref(), Some(br#"{"prompt":"please continue"}"#.as_slice()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_action_sends_nothing() {
        let mock = MockTransport::new();
        let actions = actions(&mock);
        let session = SessionSnapshot::new("s1", now_ms() - 10_000, None);

        let outcome = actions.approve_plan(&session).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Throttled));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_approve_plan_has_no_body() {
        let mock = MockTransport::new();
        let actions = actions(&mock);
        let session = SessionSnapshot::new("s1", now_ms() - 1_300_000, None);

        let outcome = actions.approve_plan(&session).await.unwrap();
        assert!(outcome.is_sent());
        let calls = mock.calls();
        assert_eq!(calls[0].url, "https://api.example.com/v1alpha/sessions/s1:approvePlan");
        assert!(calls[0].body.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_failure_propagates() {
        let mock = MockTransport::with_statuses(&[403]);
        let actions = actions(&mock);
        let session = SessionSnapshot::new("s1", 0, None);

        let err = actions.send_message(&session, "hi").await.unwrap_err();
        assert!(matches!(
            err,
            SessionGuardError::Request(RequestError::NonRetryableHttp { status: 403, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_session_id_sends_nothing() {
        let mock = MockTransport::new();
        let actions = actions(&mock);
        let session = SessionSnapshot::new("../etc", 0, None);

        let err = actions.send_message(&session, "hi").await.unwrap_err();
        assert!(matches!(err, SessionGuardError::InvalidSessionId(_)));
        assert_eq!(mock.call_count(), 0);
    }
}
