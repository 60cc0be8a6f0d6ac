//! Authorization queries and their cache keys.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, normalize_roles};

/// Requested operation, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Write,
    Delete,
    /// Anything else; never matches a family rule
    Other(String),
}

impl Operation {
    /// Parses an operation name.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "WRITE" => Self::Write,
            "DELETE" => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Write => "WRITE",
            Self::Delete => "DELETE",
            Self::Other(name) => name,
        }
    }

    /// Read-class operation.
    pub const fn is_read(&self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }

    /// Write-class operation.
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Post | Self::Put | Self::Patch | Self::Write | Self::Delete
        )
    }
}

impl From<&str> for Operation {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for Operation {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Operation> for String {
    fn from(value: Operation) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One authorization question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationQuery {
    /// Caller subject; empty for anonymous callers
    pub subject: String,
    /// Caller roles
    pub roles: BTreeSet<String>,
    /// Requested resource path
    pub resource_path: String,
    /// Requested operation
    pub operation: Operation,
    /// Opaque id linking a broker request to its response
    pub correlation_id: Option<String>,
}

impl AuthorizationQuery {
    /// Creates a query for an explicit subject and role list.
    pub fn new<I, S>(
        subject: impl Into<String>,
        roles: I,
        resource_path: impl Into<String>,
        operation: impl Into<Operation>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            subject: subject.into().trim().to_string(),
            roles: normalize_roles(roles),
            resource_path: resource_path.into(),
            operation: operation.into(),
            correlation_id: None,
        }
    }

    /// Creates a query on behalf of a validated identity.
    pub fn for_identity(
        identity: &Identity,
        resource_path: impl Into<String>,
        operation: impl Into<Operation>,
    ) -> Self {
        Self::new(
            identity.subject.clone(),
            &identity.roles,
            resource_path,
            operation,
        )
    }

    /// Attaches a correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Cache key: every decision input, correlation id excluded.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            subject: self.subject.clone(),
            roles: self.roles.iter().cloned().collect(),
            resource_path: normalize_path(&self.resource_path),
            operation: self.operation.as_str().to_string(),
        }
    }

    /// True when the caller is anonymous.
    pub fn is_anonymous(&self) -> bool {
        self.subject.is_empty()
    }
}

/// Deterministic cache key derived from a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    subject: String,
    roles: Vec<String>,
    resource_path: String,
    operation: String,
}

/// Path segments with the query string and empty segments removed.
///
/// Returns `None` for paths containing `.` or `..` segments; such paths never
/// match a path-based rule.
pub fn path_segments(path: &str) -> Option<Vec<&str>> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return None;
    }
    Some(segments)
}

/// Canonical form of a resource path used in cache keys.
pub fn normalize_path(path: &str) -> String {
    path_segments(path).map_or_else(
        || path.to_string(),
        |segments| format!("/{}", segments.join("/")),
    )
}
