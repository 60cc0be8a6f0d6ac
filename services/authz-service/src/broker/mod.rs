//! Message broker seams and the components that run on top of them.
//!
//! The broker is reached only through [`MessageConsumer`] and
//! [`MessagePublisher`]. [`InMemoryBroker`] implements both in process;
//! with the `kafka` feature, `kafka::KafkaConsumer` and
//! `kafka::KafkaPublisher` implement them against a Kafka cluster.

pub mod bridge;
pub mod events;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod payload;
pub mod publisher;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::config::{BrokerTransport, Config};
use crate::error::AuthzError;

pub use bridge::{BridgeConfig, MessageBridge, MessageOutcome};
pub use events::{LifecycleEvent, SyncKind, SyncUserRequest, UserEventKind};
pub use memory::{InMemoryBroker, InMemoryConsumer};
pub use payload::{AuthorizationRequestPayload, AuthorizationResponsePayload};
pub use publisher::EventPublisher;

/// One message on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Topic name
    pub topic: String,
    /// Routing key; equal keys land on the same partition
    pub partition_key: String,
    /// Encoded body
    pub payload: Vec<u8>,
    /// Correlation id carried alongside the body
    pub correlation_id: Option<String>,
    /// Assigned by the broker on delivery
    pub partition: Option<u32>,
    /// Assigned by the broker on delivery
    pub offset: Option<u64>,
}

impl BrokerMessage {
    /// Outbound message with a raw body.
    pub fn new(topic: impl Into<String>, partition_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition_key: partition_key.into(),
            payload,
            correlation_id: None,
            partition: None,
            offset: None,
        }
    }

    /// Outbound message with a JSON body.
    ///
    /// # Errors
    ///
    /// [`AuthzError::DeserializationFailure`] if `body` cannot be encoded.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        partition_key: impl Into<String>,
        body: &T,
    ) -> Result<Self, AuthzError> {
        Ok(Self::new(topic, partition_key, serde_json::to_vec(body)?))
    }

    /// Attaches a correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Broker acknowledgment of a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Topic written to
    pub topic: String,
    /// Partition the key routed to
    pub partition: u32,
    /// Offset assigned within the partition
    pub offset: u64,
}

/// Reads messages for one consumer group.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Next message, or `None` once `timeout` elapses without one.
    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerMessage>, AuthzError>;

    /// Marks `message` and everything before it on its partition as processed.
    async fn commit(&self, message: &BrokerMessage) -> Result<(), AuthzError>;
}

/// Writes messages and waits for the broker's acknowledgment.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes `message`, returning only once the broker has acknowledged it.
    async fn publish(&self, message: BrokerMessage) -> Result<DeliveryReceipt, AuthzError>;
}

/// Consumer of the request topic and publisher for every outbound topic.
pub type BrokerConnection = (Arc<dyn MessageConsumer>, Arc<dyn MessagePublisher>);

/// Connects to the broker selected by `config.broker_transport`.
///
/// # Errors
///
/// [`AuthzError::BrokerUnavailable`] when the Kafka clients cannot be
/// created, or Kafka is selected in a build without the `kafka` feature.
pub fn connect(config: &Config) -> Result<BrokerConnection, AuthzError> {
    match config.broker_transport {
        BrokerTransport::Kafka => connect_kafka(config),
        BrokerTransport::InMemory => {
            warn!("Using the in-process broker; no external producer or consumer can reach it");
            let broker = Arc::new(InMemoryBroker::default());
            let consumer: Arc<dyn MessageConsumer> =
                Arc::new(broker.consumer(config.consumer_group.clone(), config.request_topic.clone()));
            let publisher: Arc<dyn MessagePublisher> = broker;
            Ok((consumer, publisher))
        }
    }
}

#[cfg(feature = "kafka")]
fn connect_kafka(config: &Config) -> Result<BrokerConnection, AuthzError> {
    let consumer: Arc<dyn MessageConsumer> = Arc::new(kafka::KafkaConsumer::from_config(config)?);
    let publisher: Arc<dyn MessagePublisher> = Arc::new(kafka::KafkaPublisher::from_config(config)?);
    Ok((consumer, publisher))
}

#[cfg(not(feature = "kafka"))]
fn connect_kafka(_config: &Config) -> Result<BrokerConnection, AuthzError> {
    Err(AuthzError::broker("Kafka transport selected but this build lacks the `kafka` feature"))
}
