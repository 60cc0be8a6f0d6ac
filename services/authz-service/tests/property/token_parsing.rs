//! Token Parsing Property Tests
//!
//! Parsing is total: any input either parses or fails as malformed.

use authz_service::ErrorCode;
use authz_service::jwt::Token;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use proptest::prelude::*;
use serde_json::json;

fn segment(value: &serde_json::Value) -> String {
    URL_SAFE_NO_PAD.encode(value.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Arbitrary text never panics and fails as malformed
    #[test]
    fn prop_arbitrary_input_malformed(raw in "[A-Za-z0-9_.-]{0,80}") {
        if let Err(e) = Token::parse(&raw) {
            prop_assert_eq!(e.code(), ErrorCode::MalformedToken);
        }
    }

    /// Property: Segment counts other than three are rejected
    #[test]
    fn prop_wrong_segment_count(parts in prop::collection::vec("[A-Za-z0-9_-]{1,12}", 0..6)) {
        prop_assume!(parts.len() != 3);
        prop_assert!(Token::parse(&parts.join(".")).is_err());
    }

    /// Property: Header and kid survive parsing unchanged
    #[test]
    fn prop_parse_keeps_kid(kid in "[a-zA-Z0-9-]{1,24}", sub in "[a-z0-9|]{1,24}") {
        let header = segment(&json!({ "alg": "RS256", "typ": "JWT", "kid": kid }));
        let payload = segment(&json!({ "sub": sub, "exp": 1_900_000_000_i64 }));
        let raw = format!("{header}.{payload}.c2lnbmF0dXJl");

        let token = Token::parse(&raw).unwrap();
        prop_assert_eq!(token.kid(), kid.as_str());
        prop_assert_eq!(token.state(), "Unvalidated");
        prop_assert!(token.ensure_permitted_algorithm().is_ok());
    }

    /// Property: A blank kid is malformed regardless of the rest of the token
    #[test]
    fn prop_blank_kid_malformed(blank in "[ ]{0,3}") {
        let header = segment(&json!({ "alg": "RS256", "kid": blank }));
        let payload = segment(&json!({ "sub": "u1", "exp": 1_900_000_000_i64 }));
        let err = Token::parse(&format!("{header}.{payload}.c2ln")).unwrap_err();
        prop_assert_eq!(err.code(), ErrorCode::MalformedToken);
    }
}
