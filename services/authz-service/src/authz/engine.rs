//! Authorization engine: policy chain behind the decision cache.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::authz::cache::DecisionCache;
use crate::authz::policy::{AuthorizationDecision, PolicySet};
use crate::authz::query::AuthorizationQuery;
use crate::error::AuthzError;
use crate::observability::ServiceMetrics;

/// Seam between the message bridge and whatever produces decisions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Decides one query.
    async fn authorize(&self, query: &AuthorizationQuery) -> Result<AuthorizationDecision, AuthzError>;
}

/// Evaluates queries against a [`PolicySet`], consulting a shared
/// [`DecisionCache`] first.
pub struct AuthorizationEngine {
    policies: PolicySet,
    cache: Arc<DecisionCache>,
    metrics: Option<Arc<ServiceMetrics>>,
}

impl AuthorizationEngine {
    /// Creates an engine over `policies` sharing `cache`.
    pub const fn new(policies: PolicySet, cache: Arc<DecisionCache>) -> Self {
        Self {
            policies,
            cache,
            metrics: None,
        }
    }

    /// Records decisions and cache lookups in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Decides `query`. Never fails: an anonymous or malformed query is just
    /// another input that ends in a deny.
    #[instrument(
        skip(self, query),
        fields(subject = %query.subject, resource = %query.resource_path, operation = %query.operation)
    )]
    pub fn decide(&self, query: &AuthorizationQuery) -> AuthorizationDecision {
        let key = query.cache_key();

        if self.cache.is_enabled() {
            let cached = self.cache.get(&key);
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_lookup(cached.is_some());
            }
            if let Some(decision) = cached {
                debug!(allowed = decision.allowed, "Decision served from cache");
                return decision;
            }
        }

        let decision = self.policies.evaluate(query);
        debug!(allowed = decision.allowed, reason = ?decision.reason, "Decision evaluated");

        if let Some(metrics) = &self.metrics {
            metrics.record_decision(decision.allowed);
        }

        self.cache.insert(key, decision.clone());
        decision
    }

    /// Shared decision cache.
    pub const fn cache(&self) -> &Arc<DecisionCache> {
        &self.cache
    }

    /// Policy set in force.
    pub const fn policies(&self) -> &PolicySet {
        &self.policies
    }
}

#[async_trait]
impl Authorizer for AuthorizationEngine {
    async fn authorize(&self, query: &AuthorizationQuery) -> Result<AuthorizationDecision, AuthzError> {
        Ok(self.decide(query))
    }
}
