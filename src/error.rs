//! Error types for sessionguard
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::http::RequestError;

/// All error types that can occur in sessionguard
#[derive(Debug, Error)]
pub enum SessionGuardError {
    /// Outbound request failed terminally
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// Configuration is present but unusable
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Session id would not form a safe URL path segment
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// Session API credentials are missing
    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for sessionguard operations
pub type Result<T> = std::result::Result<T, SessionGuardError>;
