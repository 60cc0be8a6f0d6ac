//! Error taxonomy for token validation, key discovery and the message bridge.
//!
//! A negative authorization decision is not an error: it is an
//! [`AuthorizationDecision`](crate::authz::AuthorizationDecision) with
//! `allowed == false`. Everything here describes a failure to produce or
//! deliver an answer.

use chrono::{DateTime, Utc};
use rust_common::{PlatformError, Retryable};
use thiserror::Error;

/// Patterns that must never appear in a message handed back to a caller.
const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "token",
    "key",
    "credential",
    "bearer",
    "authorization",
    "private",
];

/// Errors produced by the authorization service.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AuthzError {
    /// Token `exp` lies in the past (beyond the clock-skew tolerance)
    #[error("Token expired at {expired_at}")]
    TokenExpired {
        /// When the token expired
        expired_at: DateTime<Utc>,
    },

    /// Token `nbf` lies in the future (beyond the clock-skew tolerance)
    #[error("Token not valid before {valid_from}")]
    TokenNotYetValid {
        /// When the token becomes valid
        valid_from: DateTime<Utc>,
    },

    /// Signature did not verify, or no key in the current set matches the token
    #[error("Token signature invalid: {reason}")]
    InvalidSignature {
        /// What failed
        reason: String,
    },

    /// `iss` differs from the configured issuer
    #[error("Token issuer {issuer:?} is not trusted")]
    InvalidIssuer {
        /// Issuer found in the token
        issuer: String,
    },

    /// None of the token audiences is the configured audience
    #[error("Token audience does not include the expected audience")]
    InvalidAudience,

    /// Token cannot be parsed
    #[error("Token malformed: {reason}")]
    MalformedToken {
        /// Description of the malformation
        reason: String,
    },

    /// Discovery document unreachable and no previously fetched key set exists
    #[error("Signing key discovery unavailable: {reason}")]
    DiscoveryUnavailable {
        /// Why the fetch failed
        reason: String,
    },

    /// Broker could not accept or deliver a message
    #[error("Broker unavailable: {reason}")]
    BrokerUnavailable {
        /// Why the broker call failed
        reason: String,
    },

    /// Message payload could not be decoded
    #[error("Message deserialization failed: {reason}")]
    DeserializationFailure {
        /// Decoder diagnostic
        reason: String,
    },

    /// Internal error (details sanitized in responses)
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Stable error codes for logs and API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Token expired
    TokenExpired,
    /// Token not yet valid
    TokenNotYetValid,
    /// Signature invalid
    InvalidSignature,
    /// Issuer mismatch
    InvalidIssuer,
    /// Audience mismatch
    InvalidAudience,
    /// Token malformed
    MalformedToken,
    /// Key discovery unavailable
    DiscoveryUnavailable,
    /// Broker unavailable
    BrokerUnavailable,
    /// Payload decoding failed
    DeserializationFailure,
    /// Anything else
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::TokenNotYetValid => "AUTH_TOKEN_NOT_YET_VALID",
            Self::InvalidSignature => "AUTH_TOKEN_INVALID_SIGNATURE",
            Self::InvalidIssuer => "AUTH_TOKEN_INVALID_ISSUER",
            Self::InvalidAudience => "AUTH_TOKEN_INVALID_AUDIENCE",
            Self::MalformedToken => "AUTH_TOKEN_MALFORMED",
            Self::DiscoveryUnavailable => "DISCOVERY_UNAVAILABLE",
            Self::BrokerUnavailable => "BROKER_UNAVAILABLE",
            Self::DeserializationFailure => "DESERIALIZATION_FAILURE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthzError {
    /// Get the error code for this error
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::TokenExpired { .. } => ErrorCode::TokenExpired,
            Self::TokenNotYetValid { .. } => ErrorCode::TokenNotYetValid,
            Self::InvalidSignature { .. } => ErrorCode::InvalidSignature,
            Self::InvalidIssuer { .. } => ErrorCode::InvalidIssuer,
            Self::InvalidAudience => ErrorCode::InvalidAudience,
            Self::MalformedToken { .. } => ErrorCode::MalformedToken,
            Self::DiscoveryUnavailable { .. } => ErrorCode::DiscoveryUnavailable,
            Self::BrokerUnavailable { .. } => ErrorCode::BrokerUnavailable,
            Self::DeserializationFailure { .. } => ErrorCode::DeserializationFailure,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// True for failures of the token itself, as opposed to infrastructure.
    #[must_use]
    pub const fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired { .. }
                | Self::TokenNotYetValid { .. }
                | Self::InvalidSignature { .. }
                | Self::InvalidIssuer { .. }
                | Self::InvalidAudience
                | Self::MalformedToken { .. }
        )
    }

    /// Check if this error is retryable
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BrokerUnavailable { .. } | Self::DiscoveryUnavailable { .. }
        )
    }

    /// Message safe to hand back to an untrusted caller.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::TokenExpired { .. } => "Token has expired".to_string(),
            Self::TokenNotYetValid { .. } => "Token is not yet valid".to_string(),
            Self::InvalidSignature { .. } => "Invalid token signature".to_string(),
            Self::InvalidIssuer { .. } => "Invalid token issuer".to_string(),
            Self::InvalidAudience => "Invalid token audience".to_string(),
            Self::MalformedToken { reason } => sanitize_message(reason),
            Self::DiscoveryUnavailable { .. } => {
                "Key validation temporarily unavailable".to_string()
            }
            Self::BrokerUnavailable { .. } => "Broker temporarily unavailable".to_string(),
            Self::DeserializationFailure { .. } => "Malformed message".to_string(),
            Self::Internal(_) => "Internal error".to_string(),
        }
    }

    /// Shorthand for a malformed-token error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedToken {
            reason: reason.into(),
        }
    }

    /// Shorthand for a signature error.
    pub fn invalid_signature(reason: impl Into<String>) -> Self {
        Self::InvalidSignature {
            reason: reason.into(),
        }
    }

    /// Shorthand for a broker error.
    pub fn broker(reason: impl Into<String>) -> Self {
        Self::BrokerUnavailable {
            reason: reason.into(),
        }
    }
}

impl Retryable for AuthzError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}

/// Sanitize a message by removing sensitive information
#[must_use]
pub fn sanitize_message(message: &str) -> String {
    if contains_sensitive_info(message) {
        return "Invalid token format".to_string();
    }
    message.to_string()
}

/// Check if a string contains sensitive information
#[must_use]
pub fn contains_sensitive_info(text: &str) -> bool {
    let lower = text.to_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

impl From<jsonwebtoken::errors::Error> for AuthzError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired {
                expired_at: Utc::now(),
            },
            ErrorKind::ImmatureSignature => Self::TokenNotYetValid {
                valid_from: Utc::now(),
            },
            ErrorKind::InvalidSignature => Self::invalid_signature("signature mismatch"),
            ErrorKind::InvalidAlgorithm => {
                Self::invalid_signature("algorithm does not match the signing key")
            }
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                Self::invalid_signature("signing key unusable")
            }
            ErrorKind::InvalidIssuer => Self::InvalidIssuer {
                issuer: String::new(),
            },
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            _ => Self::malformed(sanitize_message(&err.to_string())),
        }
    }
}

impl From<PlatformError> for AuthzError {
    fn from(err: PlatformError) -> Self {
        Self::DiscoveryUnavailable {
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for AuthzError {
    fn from(err: reqwest::Error) -> Self {
        PlatformError::from(err).into()
    }
}

impl From<serde_json::Error> for AuthzError {
    fn from(err: serde_json::Error) -> Self {
        Self::DeserializationFailure {
            reason: err.to_string(),
        }
    }
}
