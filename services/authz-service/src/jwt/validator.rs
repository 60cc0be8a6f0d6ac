//! Bearer token validation against the cached signing key set.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::error::AuthzError;
use crate::identity::Identity;
use crate::jwt::keyset::KeySetCache;
use crate::jwt::token::{ClaimRules, Token, Unvalidated, Validated};

/// Validates tokens and maps them to identities.
pub struct TokenValidator {
    key_sets: Arc<KeySetCache>,
    rules: ClaimRules,
    roles_claim: String,
}

impl TokenValidator {
    /// Creates a validator reading roles from `roles_claim`.
    pub fn new(key_sets: Arc<KeySetCache>, rules: ClaimRules, roles_claim: impl Into<String>) -> Self {
        Self {
            key_sets,
            rules,
            roles_claim: roles_claim.into(),
        }
    }

    /// Validates `raw` and maps its claims to an [`Identity`].
    ///
    /// # Errors
    ///
    /// See [`TokenValidator::validate_token`]; additionally
    /// [`AuthzError::MalformedToken`] when the token carries no subject.
    pub async fn validate(&self, raw: &str) -> Result<Identity, AuthzError> {
        let token = self.validate_token(raw).await?;
        Identity::from_claims(token.claims(), &self.roles_claim)
    }

    /// Runs every check in order: structure, signature, issuer, audience,
    /// then the validity window.
    ///
    /// A key id missing from the current set triggers exactly one forced
    /// refresh before the token is rejected; a refresh already made to load
    /// a missing or stale set counts as that one.
    ///
    /// # Errors
    ///
    /// The first failing check. [`AuthzError::DiscoveryUnavailable`] only
    /// when no key set was ever fetched.
    #[instrument(skip_all)]
    pub async fn validate_token(&self, raw: &str) -> Result<Token<Validated>, AuthzError> {
        let token = Token::<Unvalidated>::parse(raw)?;
        token.ensure_permitted_algorithm()?;

        let kid = token.kid().to_string();
        let (mut key_set, refreshed) = self.key_sets.get_key_set_fresh().await?;

        if key_set.find(&kid).is_none() && !refreshed {
            info!(kid = %kid, "Unknown key id, refreshing signing key set");
            key_set = self.key_sets.refresh().await?;
        }

        let key = key_set.find(&kid).ok_or_else(|| {
            AuthzError::invalid_signature(format!("no signing key with id {kid}"))
        })?;

        let verified = token.verify_signature(key)?;
        let validated = verified.validate_claims(&self.rules, Utc::now().timestamp())?;

        debug!(kid = %kid, "Token validated");
        Ok(validated)
    }

    /// Claim rules in force.
    pub const fn rules(&self) -> &ClaimRules {
        &self.rules
    }

    /// Namespaced claim roles are read from, besides `roles`.
    pub fn roles_claim(&self) -> &str {
        &self.roles_claim
    }
}
