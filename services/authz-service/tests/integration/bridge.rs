//! Message bridge end to end over the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use authz_service::authz::{AuthorizationEngine, DecisionCache, PolicySet};
use authz_service::broker::{
    BridgeConfig, BrokerMessage, InMemoryBroker, MessageBridge, MessageConsumer, MessageOutcome,
    MessagePublisher,
};
use rust_common::RetryConfig;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

const REQUESTS: &str = "auth-requests";
const RESPONSES: &str = "auth-responses";
const GROUP: &str = "authz-service";

fn config() -> BridgeConfig {
    BridgeConfig {
        response_topic: RESPONSES.to_string(),
        poll_timeout: Duration::from_millis(50),
        publish_retry: RetryConfig::fixed(2, Duration::from_millis(1)),
        poll_error_backoff: Duration::from_millis(10),
    }
}

fn bridge(broker: &Arc<InMemoryBroker>) -> MessageBridge {
    let engine = AuthorizationEngine::new(
        PolicySet::default(),
        Arc::new(DecisionCache::new(Duration::from_secs(60))),
    );
    MessageBridge::new(
        Arc::new(broker.consumer(GROUP, REQUESTS)),
        broker.clone(),
        Arc::new(engine),
        config(),
    )
}

async fn next_response(broker: &Arc<InMemoryBroker>) -> Value {
    let consumer = broker.consumer("test-reader", RESPONSES);
    let message = consumer
        .poll(Duration::from_secs(5))
        .await
        .unwrap()
        .expect("response within five seconds");
    consumer.commit(&message).await.unwrap();
    serde_json::from_slice(&message.payload).unwrap()
}

#[tokio::test]
async fn test_request_answered_with_correlation_id() {
    let broker = Arc::new(InMemoryBroker::default());
    let bridge = bridge(&broker);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { bridge.run(cancel).await }
    });

    let request = BrokerMessage::json(
        REQUESTS,
        "abc123",
        &json!({
            "userId": "u1",
            "roles": ["user"],
            "resourcePath": "/api/users/u1",
            "operation": "PUT",
            "correlationId": "abc123"
        }),
    )
    .unwrap();
    let receipt = broker.publish(request).await.unwrap();

    let response = next_response(&broker).await;
    assert_eq!(response["correlationId"], "abc123");
    assert_eq!(response["isAuthorized"], true);
    assert_eq!(response["userId"], "u1");
    assert_eq!(response["resourcePath"], "/api/users/u1");
    assert_eq!(response["operation"], "PUT");
    assert_eq!(response["roles"], json!(["user"]));

    let responses = broker.messages(RESPONSES);
    assert_eq!(responses[0].partition_key, "abc123");
    assert_eq!(responses[0].correlation_id.as_deref(), Some("abc123"));

    cancel.cancel();
    task.await.unwrap();
    assert_eq!(
        broker.committed_offset(GROUP, REQUESTS, receipt.partition),
        Some(receipt.offset + 1)
    );
}

#[tokio::test]
async fn test_malformed_message_does_not_stop_the_loop() {
    let broker = Arc::new(InMemoryBroker::default());
    let bridge = bridge(&broker);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { bridge.run(cancel).await }
    });

    broker
        .publish(BrokerMessage::new(REQUESTS, "k", b"{not json".to_vec()))
        .await
        .unwrap();
    broker
        .publish(
            BrokerMessage::json(
                REQUESTS,
                "k",
                &json!({ "userId": "u1", "resourcePath": "/api/billing", "operation": "GET" }),
            )
            .unwrap(),
        )
        .await
        .unwrap();
    let valid = broker
        .publish(
            BrokerMessage::json(
                REQUESTS,
                "k",
                &json!({
                    "userId": "u1",
                    "resourcePath": "/api/billing",
                    "operation": "GET",
                    "correlationId": "c-3"
                }),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let response = next_response(&broker).await;
    assert_eq!(response["correlationId"], "c-3");
    assert_eq!(response["isAuthorized"], false);
    assert_eq!(response["reason"], "no matching policy");

    cancel.cancel();
    task.await.unwrap();
    assert_eq!(broker.messages(RESPONSES).len(), 1);
    assert_eq!(
        broker.committed_offset(GROUP, REQUESTS, valid.partition),
        Some(valid.offset + 1)
    );
}

#[tokio::test]
async fn test_publish_failure_abandons_after_retries() {
    let broker = Arc::new(InMemoryBroker::default());
    let bridge = bridge(&broker);
    let request = BrokerMessage::json(
        REQUESTS,
        "c-9",
        &json!({
            "subject": "u1",
            "resourcePath": "/api/posts",
            "operation": "GET",
            "correlationId": "c-9"
        }),
    )
    .unwrap();

    // Three attempts with two retries; a fourth failure is left over.
    broker.fail_next_publishes(4);
    assert_eq!(bridge.process(&request).await, MessageOutcome::PublishFailed);
    assert!(broker.messages(RESPONSES).is_empty());

    // The leftover failure is absorbed by the first attempt of the next message.
    match bridge.process(&request).await {
        MessageOutcome::Published(receipt) => assert_eq!(receipt.topic, RESPONSES),
        other => panic!("expected publish, got {other:?}"),
    }
    assert_eq!(broker.messages(RESPONSES).len(), 1);
}

#[tokio::test]
async fn test_restarted_bridge_resumes_after_committed_offset() {
    let broker = Arc::new(InMemoryBroker::new(1));
    for id in ["r-1", "r-2"] {
        broker
            .publish(
                BrokerMessage::json(
                    REQUESTS,
                    "same-key",
                    &json!({
                        "subject": "u1",
                        "resourcePath": "/api/posts",
                        "operation": "GET",
                        "correlationId": id
                    }),
                )
                .unwrap(),
            )
            .await
            .unwrap();
    }

    let consumer = broker.consumer(GROUP, REQUESTS);
    let first = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
    consumer.commit(&first).await.unwrap();
    drop(consumer);

    let bridge = bridge(&broker);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { bridge.run(cancel).await }
    });

    let response = next_response(&broker).await;
    assert_eq!(response["correlationId"], "r-2");

    cancel.cancel();
    task.await.unwrap();
    assert_eq!(broker.committed_offset(GROUP, REQUESTS, 0), Some(2));
}
