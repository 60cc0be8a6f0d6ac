//! Message bridge: authorization requests in, correlated responses out.
//!
//! Per message: `received -> parsed -> decided -> published -> committed`.
//! A parse or decide failure drops the message (logged) and a publish that
//! exhausts its retries abandons it; both are still committed so the loop
//! moves on. Nothing that happens to one message stops the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_common::{RetryConfig, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::authz::Authorizer;
use crate::broker::payload::{AuthorizationRequestPayload, AuthorizationResponsePayload};
use crate::broker::{BrokerMessage, DeliveryReceipt, MessageConsumer, MessagePublisher};
use crate::config::Config;
use crate::observability::{BridgeOutcome, ServiceMetrics};

/// Bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Topic responses are published to
    pub response_topic: String,
    /// Bound on each receive
    pub poll_timeout: Duration,
    /// Publish retry schedule
    pub publish_retry: RetryConfig,
    /// Pause after a failed receive
    pub poll_error_backoff: Duration,
}

impl BridgeConfig {
    /// Settings taken from the service configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            response_topic: config.response_topic.clone(),
            poll_timeout: config.poll_timeout(),
            publish_retry: RetryConfig::fixed(config.publish_max_retries, config.publish_retry_backoff()),
            poll_error_backoff: config.publish_retry_backoff(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            response_topic: "auth-responses".to_string(),
            poll_timeout: Duration::from_secs(1),
            publish_retry: RetryConfig::fixed(3, Duration::from_secs(1)),
            poll_error_backoff: Duration::from_secs(1),
        }
    }
}

/// Terminal state of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Response published and acknowledged
    Published(DeliveryReceipt),
    /// Payload could not be decoded; dropped
    ParseFailed,
    /// No decision could be produced; dropped
    DecideFailed,
    /// Response could not be published within the retry bound; abandoned
    PublishFailed,
}

impl MessageOutcome {
    const fn label(&self) -> BridgeOutcome {
        match self {
            Self::Published(_) => BridgeOutcome::Published,
            Self::ParseFailed => BridgeOutcome::ParseFailed,
            Self::DecideFailed => BridgeOutcome::DecideFailed,
            Self::PublishFailed => BridgeOutcome::PublishFailed,
        }
    }
}

/// Consume loop connecting the broker to an [`Authorizer`].
pub struct MessageBridge {
    consumer: Arc<dyn MessageConsumer>,
    publisher: Arc<dyn MessagePublisher>,
    authorizer: Arc<dyn Authorizer>,
    config: BridgeConfig,
    metrics: Option<Arc<ServiceMetrics>>,
}

impl MessageBridge {
    /// Creates a bridge.
    pub fn new(
        consumer: Arc<dyn MessageConsumer>,
        publisher: Arc<dyn MessagePublisher>,
        authorizer: Arc<dyn Authorizer>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            consumer,
            publisher,
            authorizer,
            config,
            metrics: None,
        }
    }

    /// Records message outcomes in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Consumes until `cancel` fires.
    ///
    /// Cancellation is checked before every receive and interrupts a receive
    /// in progress; a message already received is carried to its terminal
    /// state first.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(response_topic = %self.config.response_topic, "Message bridge started");

        while !cancel.is_cancelled() {
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                polled = self.consumer.poll(self.config.poll_timeout) => polled,
            };

            match polled {
                Ok(Some(message)) => {
                    self.process(&message).await;
                    if let Err(e) = self.consumer.commit(&message).await {
                        error!(
                            error = %e,
                            topic = %message.topic,
                            partition = ?message.partition,
                            offset = ?message.offset,
                            "Failed to commit message offset"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, error_code = %e.code(), "Broker receive failed");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(self.config.poll_error_backoff) => {}
                    }
                }
            }
        }

        info!("Message bridge stopped");
    }

    /// Carries one message to its terminal state.
    #[instrument(
        skip(self, message),
        fields(topic = %message.topic, partition = ?message.partition, offset = ?message.offset)
    )]
    pub async fn process(&self, message: &BrokerMessage) -> MessageOutcome {
        let started = Instant::now();
        let outcome = self.handle(message).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_bridge_message(outcome.label(), started.elapsed().as_secs_f64());
        }
        outcome
    }

    async fn handle(&self, message: &BrokerMessage) -> MessageOutcome {
        let request = match AuthorizationRequestPayload::parse(message) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, error_code = %e.code(), "Dropping undecodable authorization request");
                return MessageOutcome::ParseFailed;
            }
        };
        let query = request.to_query();

        let correlation_id = query.correlation_id.clone().unwrap_or_default();

        let decision = match self.authorizer.authorize(&query).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(
                    error = %e,
                    error_code = %e.code(),
                    correlation_id = %correlation_id,
                    "Dropping authorization request, no decision produced"
                );
                return MessageOutcome::DecideFailed;
            }
        };

        let response = AuthorizationResponsePayload::new(request, &decision);
        let outbound = match BrokerMessage::json(&self.config.response_topic, correlation_id.clone(), &response) {
            Ok(outbound) => outbound.with_correlation_id(correlation_id.clone()),
            Err(e) => {
                error!(error = %e, correlation_id = %correlation_id, "Failed to encode response");
                return MessageOutcome::PublishFailed;
            }
        };

        let policy = RetryPolicy::new(self.config.publish_retry.clone());
        let publisher = &self.publisher;
        let published = policy
            .execute(|attempt| {
                let outbound = outbound.clone();
                async move {
                    if attempt > 0 {
                        debug!(attempt, "Retrying response publish");
                    }
                    publisher.publish(outbound).await
                }
            })
            .await;

        match published {
            Ok(receipt) => {
                debug!(
                    correlation_id = %correlation_id,
                    subject = %query.subject,
                    allowed = decision.allowed,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "Authorization response published"
                );
                MessageOutcome::Published(receipt)
            }
            Err(e) => {
                error!(
                    error = %e,
                    error_code = %e.code(),
                    correlation_id = %correlation_id,
                    "Abandoning authorization response after retries"
                );
                MessageOutcome::PublishFailed
            }
        }
    }
}
