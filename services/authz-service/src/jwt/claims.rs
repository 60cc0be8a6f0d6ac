//! JWT claim set.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// WS-* name identifier claim, used when `sub` is absent.
pub const NAME_IDENTIFIER_CLAIM: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";
/// WS-* e-mail claim.
pub const EMAIL_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
/// WS-* display name claim.
pub const NAME_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";
/// WS-* role claim.
pub const ROLE_CLAIM: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";

/// Registered claims plus every other claim the issuer asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer
    #[serde(default)]
    pub iss: String,
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Audiences; a single string is accepted
    #[serde(default, deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    /// Expiry (seconds since the epoch)
    pub exp: i64,
    /// Not valid before (seconds since the epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Issued at (seconds since the epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Every other claim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// First non-empty string value among `names`, in order.
    pub fn first_str(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| match *name {
            "sub" => self.sub.as_deref(),
            "iss" => Some(self.iss.as_str()),
            other => self.extra.get(other).and_then(Value::as_str),
        }
        .filter(|v| !v.is_empty()))
    }

    /// Raw value of a non-registered claim.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    /// Every claim as a JSON object, registered ones included.
    pub fn to_payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// `aud` may be a single string or an array.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(aud)) => vec![aud],
        Some(OneOrMany::Many(auds)) => auds,
        None => Vec::new(),
    })
}
