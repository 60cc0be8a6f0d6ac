//! Broker Payload Property Tests
//!
//! Correlation ids survive the request/response exchange unchanged.

use authz_service::authz::{AuthorizationDecision, PolicySet};
use authz_service::broker::{AuthorizationRequestPayload, AuthorizationResponsePayload, BrokerMessage};
use proptest::prelude::*;
use serde_json::json;

use super::generators::{arb_correlation_id, arb_operation, arb_protected_path, arb_roles, arb_subject};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: The response echoes the request's correlation id
    #[test]
    fn prop_response_echoes_correlation_id(
        subject in arb_subject(),
        roles in arb_roles(),
        path in arb_protected_path(),
        operation in arb_operation(),
        correlation_id in arb_correlation_id(),
    ) {
        let body = json!({
            "userId": subject,
            "roles": roles,
            "resourcePath": path,
            "operation": operation,
            "correlationId": correlation_id,
        });
        let message = BrokerMessage::json("auth-requests", correlation_id.as_str(), &body).unwrap();

        let request = AuthorizationRequestPayload::parse(&message).unwrap();
        let query = request.to_query();
        prop_assert_eq!(query.correlation_id.as_deref(), Some(correlation_id.as_str()));
        prop_assert_eq!(&query.subject, &subject);

        let decision = PolicySet::default().evaluate(&query);
        let response = AuthorizationResponsePayload::new(request, &decision);
        let wire = serde_json::to_value(&response).unwrap();

        prop_assert_eq!(&wire["correlationId"], &json!(correlation_id));
        prop_assert_eq!(&wire["isAuthorized"], &json!(decision.allowed));
        prop_assert_eq!(&wire["resourcePath"], &json!(path));
        prop_assert_eq!(&wire["userId"], &json!(subject));
        prop_assert_eq!(&wire["roles"], &json!(roles));
        prop_assert_eq!(&wire["operation"], &json!(operation));
    }

    /// Property: A header correlation id stands in for a missing body field
    #[test]
    fn prop_header_correlation_id_fallback(
        subject in arb_subject(),
        correlation_id in arb_correlation_id(),
    ) {
        let body = json!({
            "subject": subject,
            "resourcePath": "/api/posts",
            "operation": "GET",
        });
        let message = BrokerMessage::json("auth-requests", subject.as_str(), &body)
            .unwrap()
            .with_correlation_id(correlation_id.as_str());

        let query = AuthorizationRequestPayload::decode(&message).unwrap();
        prop_assert_eq!(query.correlation_id, Some(correlation_id));
        prop_assert!(query.roles.is_empty());
    }

    /// Property: Arbitrary bytes never decode into a query without failing cleanly
    #[test]
    fn prop_garbage_payload_rejected(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let message = BrokerMessage::new("auth-requests", "k", bytes);
        prop_assert!(AuthorizationRequestPayload::decode(&message).is_err());
    }

    /// Property: Deny decisions always carry a reason on the wire
    #[test]
    fn prop_deny_reason_serialized(reason in "[a-z ]{1,30}", correlation_id in arb_correlation_id()) {
        let body = json!({
            "subject": "u1",
            "roles": ["viewer"],
            "resourcePath": "/api/billing",
            "operation": "GET",
            "correlationId": correlation_id,
        });
        let message = BrokerMessage::json("auth-requests", "k", &body).unwrap();
        let request = AuthorizationRequestPayload::parse(&message).unwrap();
        let decision = AuthorizationDecision::deny(reason.as_str());
        let wire = serde_json::to_value(AuthorizationResponsePayload::new(request, &decision)).unwrap();

        prop_assert_eq!(&wire["isAuthorized"], &json!(false));
        prop_assert_eq!(&wire["reason"], &json!(reason));
    }
}
