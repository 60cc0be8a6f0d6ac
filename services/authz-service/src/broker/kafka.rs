//! Kafka transport for the broker seams.
//!
//! Offsets are committed only through [`MessageConsumer::commit`]; the
//! consumer never auto-commits, so a message read but not committed before a
//! restart is delivered again. The correlation id travels in a message
//! header as well as in the body.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::broker::{BrokerMessage, DeliveryReceipt, MessageConsumer, MessagePublisher};
use crate::config::Config;
use crate::error::AuthzError;

/// Header carrying the correlation id.
pub const CORRELATION_ID_HEADER: &str = "correlationId";

impl From<KafkaError> for AuthzError {
    fn from(err: KafkaError) -> Self {
        Self::broker(err.to_string())
    }
}

fn client_config(config: &Config) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", config.broker_bootstrap_servers.join(","))
        .set("client.id", "authz-service");
    client
}

/// Consumer-group reader of one topic.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// Joins `config.consumer_group` and subscribes to the request topic.
    ///
    /// # Errors
    ///
    /// [`AuthzError::BrokerUnavailable`] when the client cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, AuthzError> {
        let consumer: StreamConsumer = client_config(config)
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[config.request_topic.as_str()])?;

        info!(
            group = %config.consumer_group,
            topic = %config.request_topic,
            "Kafka consumer subscribed"
        );
        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageConsumer for KafkaConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerMessage>, AuthzError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(message)) => Ok(Some(inbound(&message))),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn commit(&self, message: &BrokerMessage) -> Result<(), AuthzError> {
        let (Some(partition), Some(offset)) = (message.partition, message.offset) else {
            return Ok(());
        };
        let partition = i32::try_from(partition).map_err(|_| AuthzError::broker("partition out of range"))?;
        let next = i64::try_from(offset + 1).map_err(|_| AuthzError::broker("offset out of range"))?;

        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(&message.topic, partition, Offset::Offset(next))?;
        self.consumer.commit(&offsets, CommitMode::Async)?;

        debug!(topic = %message.topic, partition, next_offset = next, "Offset committed");
        Ok(())
    }
}

fn inbound(message: &BorrowedMessage<'_>) -> BrokerMessage {
    let correlation_id = message.headers().and_then(|headers| {
        headers
            .iter()
            .find(|h| h.key == CORRELATION_ID_HEADER)
            .and_then(|h| h.value)
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(str::to_string)
    });

    BrokerMessage {
        topic: message.topic().to_string(),
        partition_key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default(),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        correlation_id,
        partition: u32::try_from(message.partition()).ok(),
        offset: u64::try_from(message.offset()).ok(),
    }
}

/// Producer that waits for the delivery report of every message.
pub struct KafkaPublisher {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl KafkaPublisher {
    /// Producer for the configured cluster, acknowledged by all in-sync replicas.
    ///
    /// # Errors
    ///
    /// [`AuthzError::BrokerUnavailable`] when the client cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, AuthzError> {
        let producer: FutureProducer = client_config(config)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", config.delivery_timeout_ms.to_string())
            .create()?;

        Ok(Self {
            producer,
            queue_timeout: config.delivery_timeout(),
        })
    }
}

#[async_trait]
impl MessagePublisher for KafkaPublisher {
    async fn publish(&self, message: BrokerMessage) -> Result<DeliveryReceipt, AuthzError> {
        let mut headers = OwnedHeaders::new();
        if let Some(id) = &message.correlation_id {
            headers = headers.insert(Header {
                key: CORRELATION_ID_HEADER,
                value: Some(id.as_str()),
            });
        }

        let record = FutureRecord::to(&message.topic)
            .key(message.partition_key.as_str())
            .payload(message.payload.as_slice())
            .headers(headers);

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
            .map_err(|(e, _)| AuthzError::from(e))?;

        Ok(DeliveryReceipt {
            topic: message.topic.clone(),
            partition: u32::try_from(partition).unwrap_or_default(),
            offset: u64::try_from(offset).unwrap_or_default(),
        })
    }
}
