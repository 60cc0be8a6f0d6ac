//! Normalized caller identity.
//!
//! Claim names are resolved once, when a token is validated, in a fixed
//! order (short OIDC name first, WS-* URI second). Nothing downstream looks
//! at raw claims.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuthzError;
use crate::jwt::claims::{Claims, EMAIL_CLAIM, NAME_CLAIM, NAME_IDENTIFIER_CLAIM, ROLE_CLAIM};

/// Identity derived from verified claims or an explicit request payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    /// Stable external user id
    pub subject: String,
    /// Union of every role source
    pub roles: BTreeSet<String>,
    /// E-mail address
    pub email: Option<String>,
    /// Display name
    pub name: Option<String>,
    /// Avatar URL
    pub picture: Option<String>,
    /// Preferred locale
    pub locale: Option<String>,
    /// Whether the identity provider verified the e-mail address
    pub email_verified: bool,
}

impl Identity {
    /// Identity with only a subject and roles, as carried by broker requests.
    pub fn new<I, S>(subject: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            subject: subject.into(),
            roles: normalize_roles(roles),
            ..Self::default()
        }
    }

    /// Maps verified claims into an identity.
    ///
    /// Roles are merged from `roles_claim`, `roles` and the WS-* role claim;
    /// each may be a comma-delimited string or an array of strings.
    ///
    /// # Errors
    ///
    /// [`AuthzError::MalformedToken`] when no subject claim is present.
    pub fn from_claims(claims: &Claims, roles_claim: &str) -> Result<Self, AuthzError> {
        let subject = claims
            .first_str(&["sub", NAME_IDENTIFIER_CLAIM])
            .ok_or_else(|| AuthzError::malformed("token carries no subject"))?
            .to_string();

        let mut roles = BTreeSet::new();
        for source in [roles_claim, "roles", ROLE_CLAIM] {
            if let Some(value) = claims.get(source) {
                collect_roles(value, &mut roles);
            }
        }

        Ok(Self {
            subject,
            roles,
            email: claims.first_str(&["email", EMAIL_CLAIM]).map(str::to_string),
            name: claims.first_str(&["name", NAME_CLAIM]).map(str::to_string),
            picture: claims.first_str(&["picture"]).map(str::to_string),
            locale: claims.first_str(&["locale"]).map(str::to_string),
            email_verified: claims.get("email_verified").is_some_and(truthy),
        })
    }

    /// True when the caller holds `role` (exact match).
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Normalized profile returned by `userinfo`.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.subject.clone(),
            email: self.email.clone().unwrap_or_default(),
            name: self.name.clone(),
            picture: self.picture.clone(),
            email_verified: self.email_verified,
            locale: self.locale.clone(),
            roles: self.roles.iter().cloned().collect(),
        }
    }
}

/// Normalized user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Subject of the token
    pub id: String,
    /// E-mail address; empty when the token carries none
    pub email: String,
    /// Display name
    pub name: Option<String>,
    /// Avatar URL
    pub picture: Option<String>,
    /// Whether the identity provider verified the e-mail address
    pub email_verified: bool,
    /// Preferred locale
    pub locale: Option<String>,
    /// Sorted roles
    pub roles: Vec<String>,
}

/// Trims, splits on commas and drops empties.
pub fn normalize_roles<I, S>(roles: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    roles
        .into_iter()
        .flat_map(|r| split_roles(r.as_ref()))
        .collect()
}

fn split_roles(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

fn collect_roles(value: &Value, into: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => into.extend(split_roles(s)),
        Value::Array(items) => items.iter().for_each(|item| collect_roles(item, into)),
        _ => {}
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
