//! Synchronous entry points: validate, authorize, userinfo and user sync.
//!
//! These are the contracts an HTTP layer calls into; they never panic or
//! propagate token failures as errors where a structured negative answer is
//! expected.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::authz::{AuthorizationDecision, AuthorizationEngine, AuthorizationQuery};
use crate::broker::{DeliveryReceipt, EventPublisher, LifecycleEvent, SyncKind, SyncUserRequest};
use crate::error::AuthzError;
use crate::identity::{Identity, UserProfile};
use crate::jwt::TokenValidator;

/// Deny message used when a valid token carries no subject.
pub const MISSING_SUBJECT_MESSAGE: &str = "User ID not found in token";

/// Role allowed to sync other users' records.
const ADMIN_ROLE: &str = "admin";

/// Result of `validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateTokenResponse {
    /// Whether the token passed every check
    pub valid: bool,
    /// Claims of a valid token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    /// Rejection reason, safe to return to the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of an `authorize` answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    /// Verdict
    pub is_authorized: bool,
    /// Deciding rule or rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `authorize` answer with its transport status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// 200
    Allowed(AuthorizeResponse),
    /// 403
    Denied(AuthorizeResponse),
    /// 500
    Failed(AuthorizeResponse),
}

impl AuthorizeOutcome {
    fn allowed(decision: &AuthorizationDecision) -> Self {
        Self::Allowed(AuthorizeResponse {
            is_authorized: true,
            message: decision.reason.clone(),
        })
    }

    fn denied(message: impl Into<String>) -> Self {
        Self::Denied(AuthorizeResponse {
            is_authorized: false,
            message: Some(message.into()),
        })
    }

    fn failed(message: impl Into<String>) -> Self {
        Self::Failed(AuthorizeResponse {
            is_authorized: false,
            message: Some(message.into()),
        })
    }

    /// HTTP status the outcome maps to.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Allowed(_) => 200,
            Self::Denied(_) => 403,
            Self::Failed(_) => 500,
        }
    }

    /// Response body.
    pub const fn response(&self) -> &AuthorizeResponse {
        match self {
            Self::Allowed(r) | Self::Denied(r) | Self::Failed(r) => r,
        }
    }

    /// True only for [`AuthorizeOutcome::Allowed`].
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

/// User sync failures.
#[derive(Debug, Error)]
pub enum SyncUserError {
    /// A required field is blank
    #[error("{0} is required")]
    MissingField(&'static str),

    /// Caller may not sync another user's record
    #[error("caller may only sync their own user record")]
    Forbidden,

    /// Event could not be published within the retry bound
    #[error("failed to publish lifecycle event: {0}")]
    Publish(#[from] AuthzError),
}

/// Facade over the validator, the engine and the event publisher.
pub struct AuthzService {
    validator: Arc<TokenValidator>,
    engine: Arc<AuthorizationEngine>,
    events: Arc<EventPublisher>,
}

impl AuthzService {
    /// Creates the facade.
    pub const fn new(
        validator: Arc<TokenValidator>,
        engine: Arc<AuthorizationEngine>,
        events: Arc<EventPublisher>,
    ) -> Self {
        Self {
            validator,
            engine,
            events,
        }
    }

    /// Validates a token, answering with its claims or the rejection reason.
    #[instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> ValidateTokenResponse {
        match self.validator.validate_token(strip_bearer(token)).await {
            Ok(validated) => ValidateTokenResponse {
                valid: true,
                payload: Some(validated.claims().to_payload()),
                error: None,
            },
            Err(e) => {
                info!(error_code = %e.code(), "Token rejected");
                ValidateTokenResponse {
                    valid: false,
                    payload: None,
                    error: Some(e.public_message()),
                }
            }
        }
    }

    /// Validates `token` and decides `operation` on `resource_path` for its holder.
    #[instrument(skip(self, token))]
    pub async fn authorize(&self, token: &str, resource_path: &str, operation: &str) -> AuthorizeOutcome {
        let validated = match self.validator.validate_token(strip_bearer(token)).await {
            Ok(validated) => validated,
            Err(e) if e.is_token_rejection() => {
                info!(error_code = %e.code(), "Token rejected");
                return AuthorizeOutcome::denied(e.public_message());
            }
            Err(e) => {
                warn!(error = %e, error_code = %e.code(), "Authorization could not be evaluated");
                return AuthorizeOutcome::failed(e.public_message());
            }
        };

        let identity = match Identity::from_claims(validated.claims(), self.roles_claim()) {
            Ok(identity) => identity,
            Err(_) => return AuthorizeOutcome::denied(MISSING_SUBJECT_MESSAGE),
        };

        self.authorize_identity(&identity, resource_path, operation)
    }

    /// Decides on behalf of an identity that is already established.
    pub fn authorize_identity(&self, identity: &Identity, resource_path: &str, operation: &str) -> AuthorizeOutcome {
        if identity.subject.is_empty() {
            return AuthorizeOutcome::denied(MISSING_SUBJECT_MESSAGE);
        }

        let query = AuthorizationQuery::for_identity(identity, resource_path, operation);
        let decision = self.engine.decide(&query);

        if decision.allowed {
            AuthorizeOutcome::allowed(&decision)
        } else {
            AuthorizeOutcome::denied(decision.reason.unwrap_or_else(|| "access denied".to_string()))
        }
    }

    /// Normalized profile of the token's holder.
    ///
    /// # Errors
    ///
    /// Any token validation failure.
    pub async fn userinfo(&self, token: &str) -> Result<UserProfile, AuthzError> {
        let identity = self.validator.validate(strip_bearer(token)).await?;
        Ok(identity.profile())
    }

    /// Publishes the lifecycle event for a user sync requested by `caller`.
    ///
    /// # Errors
    ///
    /// [`SyncUserError::MissingField`] for a blank `auth0_id` or `email`,
    /// [`SyncUserError::Forbidden`] when a non-admin syncs someone else, and
    /// [`SyncUserError::Publish`] when the broker never acknowledged.
    #[instrument(skip(self, caller, request), fields(caller = %caller.subject, auth0_id = %request.auth0_id))]
    pub async fn sync_user(
        &self,
        caller: &Identity,
        request: &SyncUserRequest,
        kind: &SyncKind,
    ) -> Result<(LifecycleEvent, DeliveryReceipt), SyncUserError> {
        if let Some(field) = request.missing_field() {
            return Err(SyncUserError::MissingField(field));
        }

        let is_admin = caller.roles.iter().any(|r| r.eq_ignore_ascii_case(ADMIN_ROLE));
        if caller.subject != request.auth0_id && !is_admin {
            warn!("Rejected sync of another user's record");
            return Err(SyncUserError::Forbidden);
        }

        let event = LifecycleEvent::from_sync(kind, request);
        let receipt = self.events.publish(&event).await?;
        Ok((event, receipt))
    }

    fn roles_claim(&self) -> &str {
        self.validator.roles_claim()
    }
}

/// Strips an optional `Bearer ` scheme prefix.
pub fn strip_bearer(token: &str) -> &str {
    let token = token.trim();
    match token.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => token,
    }
}
