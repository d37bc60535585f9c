//! Common error types for AppWatch components.

use thiserror::Error;

/// Errors surfaced by the dispatcher, token broker, store client and watch loops
#[derive(Debug, Error)]
pub enum AppWatchError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not reach the remote endpoint
    #[error("Connection error: {0}")]
    Connect(String),

    /// Request exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Remote answered with a non-success status
    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// Malformed response payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Coordination store returned something unusable
    #[error("Store error: {0}")]
    Store(String),

    /// Token exchange rejected
    #[error("Auth error: {0}")]
    Auth(String),

    /// Internal error (task panics, closed channels)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppWatchError {
    /// HTTP status code carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the failure is a transport problem rather than a rejection
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Timeout(_))
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout(_) | Self::Store(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
