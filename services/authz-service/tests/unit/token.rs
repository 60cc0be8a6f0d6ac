//! Type-state token tests with real RS256 signatures.

use authz_service::AuthzError;
use authz_service::jwt::{SigningKeySet, Token};
use serde_json::json;

use crate::common::{self, AUDIENCE, ISSUER, PRIMARY, ROTATED};

fn key_set() -> SigningKeySet {
    SigningKeySet::from_jwks(&common::jwks(&[&PRIMARY, &ROTATED]))
}

#[test]
fn test_full_transition_exposes_claims() {
    let set = key_set();
    let raw = PRIMARY.sign(&common::claims_for("auth0|u1"));

    let token = Token::parse(&raw).unwrap();
    let key = set.find(token.kid()).unwrap();
    let verified = token.verify_signature(key).unwrap();
    assert_eq!(verified.state(), "SignatureValidated");

    let validated = verified.validate_claims(&common::rules(), common::now()).unwrap();
    assert_eq!(validated.state(), "Validated");
    assert_eq!(validated.claims().sub.as_deref(), Some("auth0|u1"));
    assert_eq!(validated.claims().iss, ISSUER);
}

#[test]
fn test_signature_from_other_key_rejected() {
    let set = key_set();
    // Signed with the rotated key but claiming the primary key id.
    let raw = ROTATED.sign_as(PRIMARY.kid, &common::claims_for("u1"));

    let token = Token::parse(&raw).unwrap();
    let key = set.find(PRIMARY.kid).unwrap();
    assert!(matches!(
        token.verify_signature(key),
        Err(AuthzError::InvalidSignature { .. })
    ));
}

#[test]
fn test_tampered_payload_rejected() {
    let set = key_set();
    let raw = PRIMARY.sign(&common::claims_for("u1"));
    let forged = PRIMARY.sign(&common::claims_for("admin"));

    let mut parts: Vec<&str> = raw.split('.').collect();
    let forged_parts: Vec<&str> = forged.split('.').collect();
    parts[1] = forged_parts[1];
    let tampered = parts.join(".");

    let token = Token::parse(&tampered).unwrap();
    assert!(token.verify_signature(set.find(PRIMARY.kid).unwrap()).is_err());
}

#[test]
fn test_issuer_checked_before_audience() {
    let set = key_set();
    let raw = PRIMARY.sign(&json!({
        "iss": "https://evil.example/",
        "sub": "u1",
        "aud": "someone-else",
        "exp": common::now() + 60,
    }));

    let verified = Token::parse(&raw)
        .unwrap()
        .verify_signature(set.find(PRIMARY.kid).unwrap())
        .unwrap();
    let err = verified.validate_claims(&common::rules(), common::now()).unwrap_err();
    assert!(matches!(err, AuthzError::InvalidIssuer { ref issuer } if issuer == "https://evil.example/"));
}

#[test]
fn test_single_string_audience_accepted() {
    let set = key_set();
    let raw = PRIMARY.sign(&json!({
        "iss": ISSUER,
        "sub": "u1",
        "aud": AUDIENCE,
        "exp": common::now() + 60,
    }));

    let verified = Token::parse(&raw)
        .unwrap()
        .verify_signature(set.find(PRIMARY.kid).unwrap())
        .unwrap();
    assert!(verified.validate_claims(&common::rules(), common::now()).is_ok());
}

#[test]
fn test_expiry_respects_clock_skew() {
    let set = key_set();
    let now = common::now();
    let mut claims = common::claims_for("u1");
    claims["exp"] = json!(now - 120);

    let raw = PRIMARY.sign(&claims);
    let within_skew = Token::parse(&raw)
        .unwrap()
        .verify_signature(set.find(PRIMARY.kid).unwrap())
        .unwrap()
        .validate_claims(&common::rules(), now);
    assert!(within_skew.is_ok());

    let past_skew = Token::parse(&raw)
        .unwrap()
        .verify_signature(set.find(PRIMARY.kid).unwrap())
        .unwrap()
        .validate_claims(&common::rules(), now + 600);
    assert!(matches!(past_skew, Err(AuthzError::TokenExpired { .. })));
}

#[test]
fn test_not_before_in_future_rejected() {
    let set = key_set();
    let now = common::now();
    let mut claims = common::claims_for("u1");
    claims["nbf"] = json!(now + 3000);

    let err = Token::parse(&PRIMARY.sign(&claims))
        .unwrap()
        .verify_signature(set.find(PRIMARY.kid).unwrap())
        .unwrap()
        .validate_claims(&common::rules(), now)
        .unwrap_err();
    assert!(matches!(err, AuthzError::TokenNotYetValid { .. }));
}
