//! Centralized error type for outbound platform calls.
//!
//! Errors raised while talking to remote collaborators (identity provider,
//! broker endpoints) are classified as retryable or terminal so callers can
//! hand them straight to a [`RetryPolicy`](crate::RetryPolicy).

use thiserror::Error;

use crate::retry::Retryable;

/// Common error type for platform operations.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote endpoint answered with a non-success status
    #[error("Unexpected HTTP status {status} from {url}")]
    Status {
        /// Status code returned by the endpoint
        status: u16,
        /// Endpoint that was called
        url: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Service is temporarily unavailable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Timeout occurred
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PlatformError {
    /// Check if this error is retryable.
    ///
    /// Connection failures, timeouts and 5xx/429 answers are transient;
    /// malformed payloads and 4xx answers are not.
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_common::PlatformError;
    ///
    /// let err = PlatformError::Timeout("jwks".to_string());
    /// assert!(err.is_retryable());
    ///
    /// let err = PlatformError::InvalidInput("kid".to_string());
    /// assert!(!err.is_retryable());
    /// ```
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Unavailable(_) | Self::Timeout(_) => true,
            Self::Serialization(_) | Self::InvalidInput(_) => false,
        }
    }

    /// Create an unavailable error with the given message.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a status error for the given endpoint.
    #[must_use]
    pub fn status(status: u16, url: impl Into<String>) -> Self {
        Self::Status {
            status,
            url: url.into(),
        }
    }
}

impl Retryable for PlatformError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}
