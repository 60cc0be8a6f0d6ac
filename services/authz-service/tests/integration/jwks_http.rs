//! Signing keys fetched over HTTP from a mock discovery endpoint.

use std::sync::Arc;
use std::time::Duration;

use authz_service::jwt::{HttpKeySetSource, KeySetCache, KeySetSource, TokenValidator};
use authz_service::{AuthzError, ErrorCode};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{self, PRIMARY, ROLES_CLAIM};

const JWKS_PATH: &str = "/.well-known/jwks.json";

fn source_for(server: &MockServer) -> HttpKeySetSource {
    let url = Url::parse(&format!("{}{JWKS_PATH}", server.uri())).unwrap();
    HttpKeySetSource::new(url, Duration::from_secs(2)).unwrap()
}

fn validator_for(server: &MockServer) -> TokenValidator {
    let cache = Arc::new(KeySetCache::new(Arc::new(source_for(server)), Duration::from_secs(3600)));
    TokenValidator::new(cache, common::rules(), ROLES_CLAIM)
}

#[tokio::test]
async fn test_fetches_and_validates_against_published_keys() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::jwks(&[&PRIMARY])))
        .expect(1)
        .mount(&server)
        .await;

    let validator = validator_for(&server);
    for subject in ["auth0|a", "auth0|b", "auth0|c"] {
        let identity = validator
            .validate(&PRIMARY.sign(&common::claims_for(subject)))
            .await
            .unwrap();
        assert_eq!(identity.subject, subject);
    }
}

#[tokio::test]
async fn test_unusable_keys_are_skipped() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "keys": [
            { "kty": "RSA", "kid": "enc-key", "use": "enc", "n": "AQAB", "e": "AQAB" },
            { "kty": "RSA", "n": "AQAB", "e": "AQAB" },
            common::jwks(&[&PRIMARY]).keys[0],
        ]
    });
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let jwks = source_for(&server).fetch().await.unwrap();
    assert_eq!(jwks.keys.len(), 3);

    let cache = KeySetCache::new(Arc::new(source_for(&server)), Duration::from_secs(3600));
    let set = cache.get_key_set().await.unwrap();
    assert_eq!(set.kids().collect::<Vec<_>>(), vec![PRIMARY.kid]);
}

#[tokio::test]
async fn test_server_error_is_discovery_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let validator = validator_for(&server);
    let err = validator
        .validate(&PRIMARY.sign(&common::claims_for("u1")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DiscoveryUnavailable);
}

#[tokio::test]
async fn test_invalid_document_is_discovery_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let err = source_for(&server).fetch().await.unwrap_err();
    assert!(matches!(err, AuthzError::DiscoveryUnavailable { .. }));
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::jwks(&[&PRIMARY]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}{JWKS_PATH}", server.uri())).unwrap();
    let source = HttpKeySetSource::new(url, Duration::from_millis(200)).unwrap();
    let err = source.fetch().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::DiscoveryUnavailable);
}
