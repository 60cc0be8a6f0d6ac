//! Lifecycle events published through the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use authz_service::AuthzError;
use authz_service::broker::{
    EventPublisher, InMemoryBroker, LifecycleEvent, MessageConsumer, SyncKind, SyncUserRequest,
};
use rust_common::RetryConfig;

const TOPIC: &str = "user-events";

fn request(auth0_id: &str) -> SyncUserRequest {
    SyncUserRequest {
        auth0_id: auth0_id.to_string(),
        email: "someone@babbly.com".to_string(),
        email_verified: true,
        ..SyncUserRequest::default()
    }
}

fn publisher(broker: &Arc<InMemoryBroker>) -> EventPublisher {
    EventPublisher::new(broker.clone(), TOPIC, RetryConfig::fixed(3, Duration::from_millis(1)))
}

#[tokio::test]
async fn test_transient_failures_retried_until_acknowledged() {
    let broker = Arc::new(InMemoryBroker::default());
    broker.fail_next_publishes(2);

    let event = LifecycleEvent::from_sync(&SyncKind::New, &request("auth0|u1"));
    let receipt = publisher(&broker).publish(&event).await.unwrap();

    assert_eq!(receipt.topic, TOPIC);
    assert_eq!(receipt.partition, broker.partition_for(event.user_id()));
    assert_eq!(broker.messages(TOPIC).len(), 1);
}

#[tokio::test]
async fn test_failure_surfaced_after_retry_bound() {
    let broker = Arc::new(InMemoryBroker::default());
    broker.fail_next_publishes(4);

    let event = LifecycleEvent::from_sync(&SyncKind::New, &request("auth0|u1"));
    let err = publisher(&broker).publish(&event).await.unwrap_err();

    assert!(matches!(err, AuthzError::BrokerUnavailable { .. }));
    assert!(broker.messages(TOPIC).is_empty());
}

#[tokio::test]
async fn test_events_for_one_user_stay_ordered() {
    let broker = Arc::new(InMemoryBroker::default());
    let publisher = publisher(&broker);
    let created = LifecycleEvent::from_sync(&SyncKind::New, &request("auth0|u1"));
    let kind = SyncKind::Existing {
        user_id: created.user_id().to_string(),
    };
    let updated = LifecycleEvent::from_sync(&kind, &request("auth0|u1"));

    let first = publisher.publish(&created).await.unwrap();
    let second = publisher.publish(&updated).await.unwrap();
    assert_eq!(first.partition, second.partition);
    assert!(second.offset > first.offset);

    let consumer = broker.consumer("user-service", TOPIC);
    let mut seen = Vec::new();
    while let Some(message) = consumer.poll(Duration::from_millis(20)).await.unwrap() {
        let event: LifecycleEvent = serde_json::from_slice(&message.payload).unwrap();
        seen.push(event.event_id());
    }
    assert_eq!(seen, vec![created.event_id(), updated.event_id()]);
}
