//! Failure taxonomy for outbound requests

use std::fmt;

/// Network-level failure raised by an `HttpTransport`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            TransportError::Timeout(message)
        } else if err.is_connect() {
            TransportError::Connect(message)
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(message)
        } else {
            TransportError::Request(message)
        }
    }
}

/// The last retryable failure seen before attempts ran out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastFailure {
    /// Server answered with a retryable status (5xx or 429)
    Status { status: u16, body: String },

    /// Transport raised before a response arrived
    Transport(TransportError),
}

impl LastFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            LastFailure::Status { status, .. } => Some(*status),
            LastFailure::Transport(_) => None,
        }
    }
}

impl fmt::Display for LastFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastFailure::Status { status, body } if body.is_empty() => write!(f, "HTTP {}", status),
            LastFailure::Status { status, body } => write!(f, "HTTP {}: {}", status, body),
            LastFailure::Transport(err) => write!(f, "{}", err),
        }
    }
}

/// Terminal outcome of `Executor::execute` when no usable response was produced
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Cancelled through its request id or an external token
    #[error("Request aborted{}", id_suffix(.request_id))]
    Aborted { request_id: Option<String> },

    /// Every attempt ended in a retryable status
    #[error("Request to {url} exhausted {attempts} attempts, last failure: {last}")]
    Exhausted { url: String, attempts: u32, last: LastFailure },

    /// 4xx other than 429, surfaced without retrying
    #[error("HTTP {status} from {url}: {body}")]
    NonRetryableHttp { url: String, status: u16, body: String },

    /// Network failure on the final attempt
    #[error("Transport error calling {url} after {attempts} attempts: {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

fn id_suffix(request_id: &Option<String>) -> String {
    request_id.as_deref().map(|id| format!(" ({})", id)).unwrap_or_default()
}

impl RequestError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, RequestError::Aborted { .. })
    }

    /// HTTP status associated with the failure, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::NonRetryableHttp { status, .. } => Some(*status),
            RequestError::Exhausted { last, .. } => last.status(),
            RequestError::Aborted { .. } | RequestError::Transport { .. } => None,
        }
    }

    /// Short machine-readable class name, used in log records
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::Aborted { .. } => "aborted",
            RequestError::Exhausted { .. } => "exhausted",
            RequestError::NonRetryableHttp { .. } => "non_retryable_http",
            RequestError::Transport { .. } => "transport",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_display() {
        let err = RequestError::Aborted {
            request_id: Some("sendMessage:abc".to_string()),
        };
        assert_eq!(err.to_string(), "Request aborted (sendMessage:abc)");

        let err = RequestError::Aborted { request_id: None };
        assert_eq!(err.to_string(), "Request aborted");
    }

    #[test]
    fn test_exhausted_carries_last_status() {
        let err = RequestError::Exhausted {
            url: "https://example.com/v1/sessions".to_string(),
            attempts: 3,
            last: LastFailure::Status {
                status: 503,
                body: "unavailable".to_string(),
            },
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.kind(), "exhausted");
        assert_eq!(
            err.to_string(),
            "Request to https://example.com/v1/sessions exhausted 3 attempts, last failure: HTTP 503: unavailable"
        );
    }

    #[test]
    fn test_transport_error_source() {
        use std::error::Error;

        let err = RequestError::Transport {
            url: "https://example.com".to_string(),
            attempts: 2,
            source: TransportError::Connect("connection refused".to_string()),
        };
        assert!(err.status().is_none());
        assert!(err.source().is_some());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_last_failure_display_without_body() {
        let last = LastFailure::Status {
            status: 500,
            body: String::new(),
        };
        assert_eq!(last.to_string(), "HTTP 500");
    }
}
