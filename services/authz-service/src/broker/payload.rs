//! Wire payloads of the authorization request and response topics.

use serde::{Deserialize, Serialize};

use crate::authz::{AuthorizationDecision, AuthorizationQuery};
use crate::broker::BrokerMessage;
use crate::error::AuthzError;

/// Inbound authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequestPayload {
    /// Caller subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Alternate name for the caller subject, used when `subject` is blank
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Caller roles; null and absent both mean none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    /// Requested resource path
    pub resource_path: String,
    /// Requested operation, as sent
    pub operation: String,
    /// Opaque id linking the request to its response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuthorizationRequestPayload {
    /// Decodes a request message, resolving its correlation id.
    ///
    /// The body's correlation id wins over the one carried alongside it.
    ///
    /// # Errors
    ///
    /// [`AuthzError::DeserializationFailure`] when the body is not a valid
    /// request or neither source carries a correlation id.
    pub fn parse(message: &BrokerMessage) -> Result<Self, AuthzError> {
        let mut payload: Self = serde_json::from_slice(&message.payload)?;

        let correlation_id = payload
            .correlation_id
            .take()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| message.correlation_id.clone())
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AuthzError::DeserializationFailure {
                reason: "missing correlationId".to_string(),
            })?;

        payload.correlation_id = Some(correlation_id);
        Ok(payload)
    }

    /// Decodes a request message straight into a query.
    ///
    /// # Errors
    ///
    /// See [`AuthorizationRequestPayload::parse`].
    pub fn decode(message: &BrokerMessage) -> Result<AuthorizationQuery, AuthzError> {
        Self::parse(message).map(|payload| payload.to_query())
    }

    /// Caller subject, `subject` first and `userId` second.
    pub fn caller(&self) -> Option<&str> {
        [self.subject.as_deref(), self.user_id.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
    }

    /// Normalized query carried by the payload.
    pub fn to_query(&self) -> AuthorizationQuery {
        let query = AuthorizationQuery::new(
            self.caller().unwrap_or_default(),
            self.roles.iter().flatten(),
            self.resource_path.as_str(),
            self.operation.as_str(),
        );
        match &self.correlation_id {
            Some(id) => query.with_correlation_id(id.as_str()),
            None => query,
        }
    }
}

/// Outbound authorization response: the request as received plus the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationResponsePayload {
    /// Inbound request, echoed unchanged
    #[serde(flatten)]
    pub request: AuthorizationRequestPayload,
    /// Verdict
    pub is_authorized: bool,
    /// Rule that decided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuthorizationResponsePayload {
    /// Builds the response to `request`.
    pub fn new(request: AuthorizationRequestPayload, decision: &AuthorizationDecision) -> Self {
        Self {
            request,
            is_authorized: decision.allowed,
            reason: decision.reason.clone(),
        }
    }

    /// Correlation id of the answered request.
    pub fn correlation_id(&self) -> &str {
        self.request.correlation_id.as_deref().unwrap_or_default()
    }
}
