//! In-process broker with partitions and consumer-group offsets.
//!
//! Messages are appended to per-partition logs and never removed. Each
//! consumer group has a committed offset per partition; a consumer created
//! for a group starts at the committed offsets, so anything read but not
//! committed before a restart is delivered again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::broker::{BrokerMessage, DeliveryReceipt, MessageConsumer, MessagePublisher};
use crate::error::AuthzError;

const DEFAULT_PARTITIONS: u32 = 3;

#[derive(Debug, Clone)]
struct Record {
    key: String,
    payload: Vec<u8>,
    correlation_id: Option<String>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<Record>>>,
    committed: HashMap<(String, String, u32), u64>,
}

/// In-process broker.
#[derive(Debug)]
pub struct InMemoryBroker {
    partitions: u32,
    state: Mutex<BrokerState>,
    published: Notify,
    injected_failures: AtomicU32,
}

impl InMemoryBroker {
    /// Broker whose topics have `partitions` partitions each (at least one).
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Mutex::new(BrokerState::default()),
            published: Notify::new(),
            injected_failures: AtomicU32::new(0),
        }
    }

    /// Consumer reading `topic` on behalf of `group`.
    pub fn consumer(self: &Arc<Self>, group: impl Into<String>, topic: impl Into<String>) -> InMemoryConsumer {
        InMemoryConsumer {
            broker: Arc::clone(self),
            group: group.into(),
            topic: topic.into(),
            positions: Mutex::new(HashMap::new()),
        }
    }

    /// Makes the next `count` publishes fail with [`AuthzError::BrokerUnavailable`].
    pub fn fail_next_publishes(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Partition that `key` routes to.
    pub fn partition_for(&self, key: &str) -> u32 {
        let hash = fnv1a(key.as_bytes());
        u32::try_from(hash % u64::from(self.partitions)).unwrap_or_default()
    }

    /// Every message on `topic`, partition by partition.
    pub fn messages(&self, topic: &str) -> Vec<BrokerMessage> {
        let state = self.state.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter()
                    .enumerate()
                    .map(move |(offset, record)| to_message(topic, partition, offset, record))
            })
            .collect()
    }

    /// Committed offset (next offset to read) of `group` on one partition.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        self.state
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn append(&self, message: BrokerMessage) -> DeliveryReceipt {
        let partition = self.partition_for(&message.partition_key);
        let mut state = self.state.lock();
        let partitions = state
            .topics
            .entry(message.topic.clone())
            .or_insert_with(|| vec![Vec::new(); self.partitions as usize]);
        let log = &mut partitions[partition as usize];
        log.push(Record {
            key: message.partition_key,
            payload: message.payload,
            correlation_id: message.correlation_id,
        });
        DeliveryReceipt {
            topic: message.topic,
            partition,
            offset: (log.len() - 1) as u64,
        }
    }

    fn read(&self, topic: &str, partition: u32, offset: u64) -> Option<BrokerMessage> {
        let state = self.state.lock();
        let log = state.topics.get(topic)?.get(partition as usize)?;
        let index = usize::try_from(offset).ok()?;
        log.get(index)
            .map(|record| to_message(topic, partition as usize, index, record))
    }

    fn committed_or_zero(&self, group: &str, topic: &str, partition: u32) -> u64 {
        self.committed_offset(group, topic, partition).unwrap_or(0)
    }

    fn commit(&self, group: &str, topic: &str, partition: u32, next_offset: u64) {
        let mut state = self.state.lock();
        let committed = state
            .committed
            .entry((group.to_string(), topic.to_string(), partition))
            .or_insert(0);
        *committed = (*committed).max(next_offset);
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn publish(&self, message: BrokerMessage) -> Result<DeliveryReceipt, AuthzError> {
        if self.take_injected_failure() {
            warn!(topic = %message.topic, "Injected publish failure");
            return Err(AuthzError::broker("injected publish failure"));
        }

        let receipt = self.append(message);
        debug!(
            topic = %receipt.topic,
            partition = receipt.partition,
            offset = receipt.offset,
            "Message appended"
        );
        self.published.notify_waiters();
        Ok(receipt)
    }
}

/// Consumer of one topic within one consumer group.
#[derive(Debug)]
pub struct InMemoryConsumer {
    broker: Arc<InMemoryBroker>,
    group: String,
    topic: String,
    positions: Mutex<HashMap<u32, u64>>,
}

impl InMemoryConsumer {
    fn next_message(&self) -> Option<BrokerMessage> {
        let mut positions = self.positions.lock();
        for partition in 0..self.broker.partitions {
            let position = positions.entry(partition).or_insert_with(|| {
                self.broker
                    .committed_or_zero(&self.group, &self.topic, partition)
            });
            if let Some(message) = self.broker.read(&self.topic, partition, *position) {
                *position += 1;
                return Some(message);
            }
        }
        None
    }
}

#[async_trait]
impl MessageConsumer for InMemoryConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerMessage>, AuthzError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.broker.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.next_message() {
                return Ok(Some(message));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&self, message: &BrokerMessage) -> Result<(), AuthzError> {
        let (Some(partition), Some(offset)) = (message.partition, message.offset) else {
            return Err(AuthzError::broker("cannot commit a message that was never delivered"));
        };
        self.broker.commit(&self.group, &message.topic, partition, offset + 1);
        Ok(())
    }
}

fn to_message(topic: &str, partition: usize, offset: usize, record: &Record) -> BrokerMessage {
    BrokerMessage {
        topic: topic.to_string(),
        partition_key: record.key.clone(),
        payload: record.payload.clone(),
        correlation_id: record.correlation_id.clone(),
        partition: u32::try_from(partition).ok(),
        offset: Some(offset as u64),
    }
}

/// 64-bit FNV-1a; stable across processes, unlike the std hasher.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET_BASIS, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}
