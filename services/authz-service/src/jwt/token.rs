//! Type-state bearer token.
//!
//! Claims are only reachable on a [`Token<Validated>`], so a value that has
//! skipped the signature or claim checks cannot be turned into an identity.

use std::marker::PhantomData;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header};

use crate::error::AuthzError;
use crate::jwt::claims::Claims;
use crate::jwt::keyset::SigningKey;

/// Asymmetric algorithms a token may be signed with.
pub const PERMITTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

mod private {
    pub trait Sealed {}
}

/// Marker trait for token validation states
pub trait TokenState: private::Sealed {
    /// Human-readable state name for debugging
    fn state_name() -> &'static str;
}

/// Parsed, nothing verified
#[derive(Debug)]
pub struct Unvalidated;
impl private::Sealed for Unvalidated {}
impl TokenState for Unvalidated {
    fn state_name() -> &'static str {
        "Unvalidated"
    }
}

/// Signature verified against a key from the current set
#[derive(Debug)]
pub struct SignatureValidated;
impl private::Sealed for SignatureValidated {}
impl TokenState for SignatureValidated {
    fn state_name() -> &'static str {
        "SignatureValidated"
    }
}

/// Signature, issuer, audience and validity window all verified
#[derive(Debug)]
pub struct Validated;
impl private::Sealed for Validated {}
impl TokenState for Validated {
    fn state_name() -> &'static str {
        "Validated"
    }
}

/// Claim checks applied after the signature is verified.
#[derive(Debug, Clone)]
pub struct ClaimRules {
    /// Exact `iss` value required
    pub issuer: String,
    /// Value that must appear in `aud`
    pub audience: String,
    /// Tolerance applied to `exp` and `nbf`
    pub clock_skew: Duration,
}

/// Type-state token wrapper.
#[derive(Debug)]
pub struct Token<State: TokenState> {
    raw: String,
    header: Header,
    kid: String,
    claims: Claims,
    _state: PhantomData<State>,
}

impl<S: TokenState> Token<S> {
    fn transition<T: TokenState>(self, claims: Claims) -> Token<T> {
        Token {
            raw: self.raw,
            header: self.header,
            kid: self.kid,
            claims,
            _state: PhantomData,
        }
    }

    /// Key id from the header.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm from the header.
    pub const fn algorithm(&self) -> Algorithm {
        self.header.alg
    }

    /// Current state name.
    pub fn state(&self) -> &'static str {
        S::state_name()
    }
}

impl Token<Unvalidated> {
    /// Parses the compact serialization without verifying anything.
    ///
    /// # Errors
    ///
    /// [`AuthzError::MalformedToken`] unless the input has three non-empty
    /// segments, a decodable header carrying a key id, and a JSON payload.
    pub fn parse(raw: &str) -> Result<Self, AuthzError> {
        let raw = raw.trim();
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(AuthzError::malformed("expected three dot-separated segments"));
        }

        let header = decode_header(raw)
            .map_err(|e| AuthzError::malformed(format!("invalid header: {e}")))?;

        let kid = header
            .kid
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AuthzError::malformed("missing kid in header"))?;

        let payload = URL_SAFE_NO_PAD
            .decode(segments[1])
            .map_err(|_| AuthzError::malformed("payload is not base64url"))?;
        let claims: Claims = serde_json::from_slice(&payload)
            .map_err(|e| AuthzError::malformed(format!("invalid claims: {e}")))?;

        Ok(Self {
            raw: raw.to_string(),
            header,
            kid,
            claims,
            _state: PhantomData,
        })
    }

    /// Rejects symmetric and unsigned algorithms before any key lookup.
    ///
    /// # Errors
    ///
    /// [`AuthzError::InvalidSignature`] for algorithms outside
    /// [`PERMITTED_ALGORITHMS`].
    pub fn ensure_permitted_algorithm(&self) -> Result<(), AuthzError> {
        if PERMITTED_ALGORITHMS.contains(&self.header.alg) {
            Ok(())
        } else {
            Err(AuthzError::invalid_signature(format!(
                "algorithm {:?} is not permitted",
                self.header.alg
            )))
        }
    }

    /// Verifies the signature with `key`.
    ///
    /// # Errors
    ///
    /// [`AuthzError::InvalidSignature`] if the algorithm is not permitted,
    /// differs from the key's, or the signature does not verify.
    pub fn verify_signature(self, key: &SigningKey) -> Result<Token<SignatureValidated>, AuthzError> {
        self.ensure_permitted_algorithm()?;

        if key.algorithm != self.header.alg {
            return Err(AuthzError::invalid_signature(
                "algorithm does not match the signing key",
            ));
        }

        let mut validation = Validation::new(self.header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(&self.raw, key.decoding_key(), &validation)?;
        Ok(self.transition(data.claims))
    }
}

impl Token<SignatureValidated> {
    /// Checks issuer, audience and the validity window at `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// The first failing check, in that order.
    pub fn validate_claims(self, rules: &ClaimRules, now: i64) -> Result<Token<Validated>, AuthzError> {
        let claims = &self.claims;

        if claims.iss != rules.issuer {
            return Err(AuthzError::InvalidIssuer {
                issuer: claims.iss.clone(),
            });
        }

        if !claims.aud.iter().any(|a| a == &rules.audience) {
            return Err(AuthzError::InvalidAudience);
        }

        let skew = i64::try_from(rules.clock_skew.as_secs()).unwrap_or(i64::MAX);

        if now > claims.exp.saturating_add(skew) {
            return Err(AuthzError::TokenExpired {
                expired_at: timestamp(claims.exp),
            });
        }

        if let Some(nbf) = claims.nbf {
            if nbf > now.saturating_add(skew) {
                return Err(AuthzError::TokenNotYetValid {
                    valid_from: timestamp(nbf),
                });
            }
        }

        let claims = self.claims.clone();
        Ok(self.transition(claims))
    }
}

impl Token<Validated> {
    /// Verified claims.
    pub const fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Consumes the token, keeping its claims.
    pub fn into_claims(self) -> Claims {
        self.claims
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
