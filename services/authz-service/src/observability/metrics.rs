//! Service Metrics
//!
//! Prometheus counters for decisions, the decision cache, the message bridge,
//! key set refreshes and lifecycle event publishing.

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

const NAMESPACE: &str = "authz";

/// Outcome label for bridge messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Response published and acknowledged
    Published,
    /// Payload could not be decoded
    ParseFailed,
    /// Decision could not be produced
    DecideFailed,
    /// Response could not be published within the retry bound
    PublishFailed,
}

impl BridgeOutcome {
    /// Label value
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::ParseFailed => "parse_failed",
            Self::DecideFailed => "decide_failed",
            Self::PublishFailed => "publish_failed",
        }
    }
}

/// Service metrics
pub struct ServiceMetrics {
    /// Decisions evaluated, by outcome (allowed/denied)
    pub decisions: CounterVec,
    /// Decision cache lookups, by result (hit/miss)
    pub cache_lookups: CounterVec,
    /// Bridge messages, by terminal outcome
    pub bridge_messages: CounterVec,
    /// Time from receipt to terminal state
    pub bridge_latency: HistogramVec,
    /// Key set fetches, by result (success/failure)
    pub key_set_refreshes: CounterVec,
    /// Lifecycle events, by result (published/failed)
    pub lifecycle_events: CounterVec,
}

impl ServiceMetrics {
    /// Creates new service metrics
    ///
    /// # Errors
    ///
    /// Returns an error if a collector is already registered in `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let decisions = CounterVec::new(
            Opts::new("decisions_total", "Total authorization decisions evaluated")
                .namespace(NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(decisions.clone()))?;

        let cache_lookups = CounterVec::new(
            Opts::new("decision_cache_total", "Total decision cache lookups").namespace(NAMESPACE),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        let bridge_messages = CounterVec::new(
            Opts::new("bridge_messages_total", "Total bridge messages by terminal outcome")
                .namespace(NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(bridge_messages.clone()))?;

        let bridge_latency = HistogramVec::new(
            HistogramOpts::new(
                "bridge_message_duration_seconds",
                "Bridge message handling time in seconds",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(bridge_latency.clone()))?;

        let key_set_refreshes = CounterVec::new(
            Opts::new("key_set_refresh_total", "Total signing key set fetches").namespace(NAMESPACE),
            &["result"],
        )?;
        registry.register(Box::new(key_set_refreshes.clone()))?;

        let lifecycle_events = CounterVec::new(
            Opts::new("lifecycle_events_total", "Total lifecycle events published")
                .namespace(NAMESPACE),
            &["result"],
        )?;
        registry.register(Box::new(lifecycle_events.clone()))?;

        Ok(Self {
            decisions,
            cache_lookups,
            bridge_messages,
            bridge_latency,
            key_set_refreshes,
            lifecycle_events,
        })
    }

    /// Records an evaluated decision
    pub fn record_decision(&self, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "denied" };
        self.decisions.with_label_values(&[outcome]).inc();
    }

    /// Records a cache lookup
    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    /// Records a bridge message reaching a terminal state
    pub fn record_bridge_message(&self, outcome: BridgeOutcome, elapsed_secs: f64) {
        self.bridge_messages.with_label_values(&[outcome.as_str()]).inc();
        self.bridge_latency
            .with_label_values(&[outcome.as_str()])
            .observe(elapsed_secs);
    }

    /// Records a key set fetch
    pub fn record_key_set_refresh(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.key_set_refreshes.with_label_values(&[result]).inc();
    }

    /// Records a lifecycle event publish attempt sequence
    pub fn record_lifecycle_event(&self, published: bool) {
        let result = if published { "published" } else { "failed" };
        self.lifecycle_events.with_label_values(&[result]).inc();
    }
}
