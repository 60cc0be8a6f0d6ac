//! Token validator tests: ordering, error kinds and identity mapping.

use authz_service::{AuthzError, ErrorCode};
use serde_json::json;

use crate::common::{self, CountingSource, PRIMARY, ROLES_CLAIM, ROTATED};

#[tokio::test]
async fn test_valid_token_maps_identity_with_merged_roles() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let (_, validator) = common::validator(source);

    let mut claims = common::claims_for("auth0|u1");
    claims[ROLES_CLAIM] = json!("editor,moderator");
    claims["roles"] = json!(["viewer"]);

    let identity = validator.validate(&PRIMARY.sign(&claims)).await.unwrap();
    assert_eq!(identity.subject, "auth0|u1");
    assert_eq!(identity.email.as_deref(), Some("auth0|u1@babbly.com"));
    for role in ["editor", "moderator", "viewer"] {
        assert!(identity.has_role(role), "missing {role}");
    }
}

#[tokio::test]
async fn test_malformed_token_short_circuits_before_discovery() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let (_, validator) = common::validator(source.clone());

    for raw in ["", "not-a-token", "a.b", "a..c"] {
        let err = validator.validate(raw).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedToken, "input {raw:?}");
    }
    assert_eq!(source.fetches(), 0);
}

#[tokio::test]
async fn test_symmetric_algorithm_rejected_without_refresh() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let (_, validator) = common::validator(source.clone());

    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256);
    header.kid = Some("attacker".to_string());
    let raw = jsonwebtoken::encode(
        &header,
        &common::claims_for("u1"),
        &jsonwebtoken::EncodingKey::from_secret(b"public-modulus-as-secret"),
    )
    .unwrap();

    let err = validator.validate(&raw).await.unwrap_err();
    assert!(matches!(err, AuthzError::InvalidSignature { .. }));
    assert_eq!(source.fetches(), 0);
}

#[tokio::test]
async fn test_wrong_audience() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let (_, validator) = common::validator(source);

    let mut claims = common::claims_for("u1");
    claims["aud"] = json!("https://other-api");
    let err = validator.validate(&PRIMARY.sign(&claims)).await.unwrap_err();
    assert!(matches!(err, AuthzError::InvalidAudience));
}

#[tokio::test]
async fn test_expired_token() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let (_, validator) = common::validator(source);

    let mut claims = common::claims_for("u1");
    claims["exp"] = json!(common::now() - 3600);
    let err = validator.validate(&PRIMARY.sign(&claims)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::TokenExpired);
    assert!(err.is_token_rejection());
}

#[tokio::test]
async fn test_unknown_kid_still_unknown_after_refresh() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let (_, validator) = common::validator(source.clone());

    let err = validator
        .validate(&ROTATED.sign(&common::claims_for("u1")))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthzError::InvalidSignature { .. }));
    // The fetch that populated the cold cache is the only refresh.
    assert_eq!(source.fetches(), 1);
}

#[tokio::test]
async fn test_missing_subject_is_malformed() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let (_, validator) = common::validator(source);

    let claims = json!({
        "iss": common::ISSUER,
        "aud": common::AUDIENCE,
        "exp": common::now() + 60,
    });
    let err = validator.validate(&PRIMARY.sign(&claims)).await.unwrap_err();
    assert!(matches!(err, AuthzError::MalformedToken { .. }));
}

#[tokio::test]
async fn test_discovery_unavailable_without_cached_set() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    source.set_failing(true);
    let (_, validator) = common::validator(source);

    let err = validator
        .validate(&PRIMARY.sign(&common::claims_for("u1")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DiscoveryUnavailable);
    assert!(!err.is_token_rejection());
}
