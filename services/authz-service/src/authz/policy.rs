//! Ordered policy chain.
//!
//! Rules are evaluated top to bottom and the first match decides:
//! public prefix, administrative role, self-access, resource family, and
//! finally a deny with reason "no matching policy".

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::authz::query::{AuthorizationQuery, path_segments};

/// Reason attached to a deny produced when no rule matched.
pub const NO_MATCHING_POLICY: &str = "no matching policy";

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    /// Whether the operation is allowed
    pub allowed: bool,
    /// Diagnostic reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuthorizationDecision {
    /// Allow with a reason.
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: Some(reason.into()),
        }
    }

    /// Deny with a reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Who may read a resource family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Anonymous callers included
    Anyone,
    /// Non-empty subject required
    Authenticated,
}

/// A collection of resources sharing one policy, e.g. `posts`.
#[derive(Debug, Clone)]
pub struct ResourceFamily {
    /// Collection segment, e.g. `posts`
    pub name: String,
    /// Read-class rule
    pub read: ReadPolicy,
    /// When set, write-class operations require this role
    pub manager_role: Option<String>,
}

impl ResourceFamily {
    /// Family readable by anyone and writable by any authenticated caller.
    pub fn public(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read: ReadPolicy::Anyone,
            manager_role: None,
        }
    }

    /// Family readable by authenticated callers and writable only by `role`.
    pub fn managed(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read: ReadPolicy::Authenticated,
            manager_role: Some(role.into()),
        }
    }
}

/// Declarative policy set.
#[derive(Debug, Clone)]
pub struct PolicySet {
    /// Paths readable and writable without any identity
    pub public_prefixes: Vec<String>,
    /// Roles that are allowed everything
    pub admin_roles: BTreeSet<String>,
    /// Namespaces whose next segment is a subject id
    pub self_namespaces: Vec<String>,
    /// Leading segment that may precede a family name
    pub api_prefix: String,
    /// Known resource families
    pub families: Vec<ResourceFamily>,
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            public_prefixes: vec![
                "/health".to_string(),
                "/api/health".to_string(),
                "/api/auth/health".to_string(),
            ],
            admin_roles: BTreeSet::from(["admin".to_string()]),
            self_namespaces: vec!["/api/users".to_string(), "/users".to_string()],
            api_prefix: "api".to_string(),
            families: vec![
                ResourceFamily::managed("users", "user_manager"),
                ResourceFamily::public("posts"),
                ResourceFamily::public("comments"),
                ResourceFamily::public("likes"),
            ],
        }
    }
}

impl PolicySet {
    /// Runs the rule chain. Pure: the same query always yields the same decision.
    pub fn evaluate(&self, query: &AuthorizationQuery) -> AuthorizationDecision {
        let segments = path_segments(&query.resource_path);

        if let Some(segments) = segments.as_deref() {
            if self.is_public(segments) {
                return AuthorizationDecision::allow("public resource");
            }
        }

        if !query.is_anonymous() && self.is_admin(query) {
            return AuthorizationDecision::allow("administrative role");
        }

        let Some(segments) = segments else {
            return AuthorizationDecision::deny(NO_MATCHING_POLICY);
        };

        if !query.is_anonymous() && self.is_self_access(&segments, &query.subject) {
            return AuthorizationDecision::allow("self access");
        }

        if let Some(family) = self.family_of(&segments) {
            if let Some(decision) = family_decision(family, query) {
                return decision;
            }
        }

        AuthorizationDecision::deny(NO_MATCHING_POLICY)
    }

    fn is_public(&self, segments: &[&str]) -> bool {
        self.public_prefixes
            .iter()
            .any(|prefix| starts_with_segments(segments, prefix))
    }

    fn is_admin(&self, query: &AuthorizationQuery) -> bool {
        query.roles.iter().any(|role| {
            self.admin_roles
                .iter()
                .any(|admin| admin.eq_ignore_ascii_case(role))
        })
    }

    fn is_self_access(&self, segments: &[&str], subject: &str) -> bool {
        self.self_namespaces.iter().any(|namespace| {
            let depth = prefix_segments(namespace).count();
            starts_with_segments(segments, namespace) && segments.get(depth) == Some(&subject)
        })
    }

    fn family_of(&self, segments: &[&str]) -> Option<&ResourceFamily> {
        let rest = match segments.split_first() {
            Some((first, rest)) if first.eq_ignore_ascii_case(&self.api_prefix) => rest,
            _ => segments,
        };
        let name = rest.first()?;
        self.families
            .iter()
            .find(|family| family.name.eq_ignore_ascii_case(name))
    }
}

fn family_decision(family: &ResourceFamily, query: &AuthorizationQuery) -> Option<AuthorizationDecision> {
    let op = &query.operation;

    if op.is_read() {
        return Some(match family.read {
            ReadPolicy::Anyone => AuthorizationDecision::allow(format!("{} readable by anyone", family.name)),
            ReadPolicy::Authenticated if !query.is_anonymous() => {
                AuthorizationDecision::allow(format!("{} readable by authenticated callers", family.name))
            }
            ReadPolicy::Authenticated => AuthorizationDecision::deny("authentication required"),
        });
    }

    if op.is_write() {
        if query.is_anonymous() {
            return Some(AuthorizationDecision::deny("authentication required"));
        }
        return Some(match &family.manager_role {
            Some(role) if query.roles.contains(role) => {
                AuthorizationDecision::allow(format!("{role} may modify {}", family.name))
            }
            Some(role) => AuthorizationDecision::deny(format!("{role} role required")),
            None => AuthorizationDecision::allow(format!("authenticated caller may modify {}", family.name)),
        });
    }

    None
}

fn prefix_segments(prefix: &str) -> impl Iterator<Item = &str> {
    prefix.split('/').filter(|s| !s.is_empty())
}

/// Segment-boundary prefix match: `/api/health` matches `/api/health/live`
/// but not `/api/healthz`.
fn starts_with_segments(segments: &[&str], prefix: &str) -> bool {
    let mut iter = segments.iter();
    prefix_segments(prefix).all(|p| iter.next().is_some_and(|s| s.eq_ignore_ascii_case(p)))
}
