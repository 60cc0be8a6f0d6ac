//! Lifecycle event publisher.

use std::sync::Arc;

use rust_common::{RetryConfig, RetryPolicy};
use tracing::{error, info, instrument, warn};

use crate::broker::events::LifecycleEvent;
use crate::broker::{BrokerMessage, DeliveryReceipt, MessagePublisher};
use crate::config::Config;
use crate::error::AuthzError;
use crate::observability::ServiceMetrics;

/// Publishes lifecycle events keyed by user id.
///
/// `publish` returns only after the broker acknowledged the event. Transient
/// failures are retried with a fixed backoff up to a bound; after that the
/// failure is handed back to the caller.
pub struct EventPublisher {
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
    retry: RetryPolicy,
    metrics: Option<Arc<ServiceMetrics>>,
}

impl EventPublisher {
    /// Publisher writing to `topic` with the given retry schedule.
    pub fn new(publisher: Arc<dyn MessagePublisher>, topic: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            retry: RetryPolicy::new(retry),
            metrics: None,
        }
    }

    /// Publisher configured from the service configuration.
    pub fn from_config(publisher: Arc<dyn MessagePublisher>, config: &Config) -> Self {
        Self::new(
            publisher,
            config.user_topic.clone(),
            RetryConfig::fixed(config.publish_max_retries, config.publish_retry_backoff()),
        )
    }

    /// Records publish results in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Publishes `event` and waits for the acknowledgment.
    ///
    /// # Errors
    ///
    /// [`AuthzError::BrokerUnavailable`] once the retry bound is exhausted,
    /// or any non-retryable error immediately.
    #[instrument(
        skip(self, event),
        fields(event_id = %event.event_id(), event_type = %event.event_type(), user_id = %event.user_id())
    )]
    pub async fn publish(&self, event: &LifecycleEvent) -> Result<DeliveryReceipt, AuthzError> {
        let message = BrokerMessage::json(&self.topic, event.user_id(), event)?;
        let publisher = &self.publisher;
        let max_retries = self.retry.max_retries();

        let result = self
            .retry
            .execute(|attempt| {
                let message = message.clone();
                async move {
                    let result = publisher.publish(message).await;
                    if let Err(e) = &result {
                        warn!(attempt = attempt + 1, max_retries, error = %e, "Lifecycle event publish failed");
                    }
                    result
                }
            })
            .await;

        if let Some(metrics) = &self.metrics {
            metrics.record_lifecycle_event(result.is_ok());
        }

        match &result {
            Ok(receipt) => info!(
                topic = %receipt.topic,
                partition = receipt.partition,
                offset = receipt.offset,
                "Lifecycle event published"
            ),
            Err(e) => error!(error = %e, error_code = %e.code(), "Lifecycle event not published"),
        }
        result
    }

    /// Topic events are written to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}
