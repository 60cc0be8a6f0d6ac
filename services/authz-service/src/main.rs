//! Authorization Service - Main Entry Point
//!
//! Loads configuration, warms the signing key set and runs the key refresh,
//! cache sweep and message bridge tasks until SIGINT or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use authz_service::authz::{AuthorizationEngine, DecisionCache, PolicySet};
use authz_service::broker::{self, BridgeConfig, EventPublisher, MessageBridge};
use authz_service::config::Config;
use authz_service::jwt::{ClaimRules, HttpKeySetSource, KeySetCache, TokenValidator};
use authz_service::observability::ServiceMetrics;
use authz_service::service::AuthzService;
use authz_service::shutdown::{ShutdownCoordinator, wait_for_signal};
use rust_common::{TracingConfig, init_tracing};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("invalid configuration")?;

    init_tracing(
        &TracingConfig::default()
            .with_service_name("authz-service")
            .with_log_level(config.log_level.clone())
            .with_json_output(config.log_json),
    )
    .context("failed to initialise tracing")?;

    let metrics = Arc::new(
        ServiceMetrics::new(prometheus::default_registry()).context("failed to register metrics")?,
    );

    info!(
        domain = %config.auth0_domain,
        jwks_url = %config.jwks_url_str(),
        transport = %config.broker_transport,
        brokers = ?config.broker_bootstrap_servers,
        "Starting Authorization Service"
    );

    let source = HttpKeySetSource::new(config.jwks_url.clone(), config.discovery_timeout())?;
    let key_sets = Arc::new(
        KeySetCache::new(Arc::new(source), config.key_set_refresh_interval())
            .with_metrics(Arc::clone(&metrics)),
    );
    if let Err(e) = key_sets.refresh().await {
        warn!(error = %e, "Initial key set fetch failed, will retry on demand");
    }

    let validator = Arc::new(TokenValidator::new(
        Arc::clone(&key_sets),
        ClaimRules {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            clock_skew: config.clock_skew(),
        },
        config.roles_claim.clone(),
    ));

    let cache = Arc::new(if config.decision_cache_enabled {
        DecisionCache::new(config.decision_cache_ttl())
    } else {
        DecisionCache::disabled()
    });
    let engine = Arc::new(
        AuthorizationEngine::new(PolicySet::default(), Arc::clone(&cache)).with_metrics(Arc::clone(&metrics)),
    );

    let (consumer, publisher) = broker::connect(&config).context("failed to connect to the broker")?;
    let events = Arc::new(
        EventPublisher::from_config(Arc::clone(&publisher), &config).with_metrics(Arc::clone(&metrics)),
    );
    let bridge = MessageBridge::new(consumer, publisher, engine.clone(), BridgeConfig::from_config(&config))
        .with_metrics(Arc::clone(&metrics));

    // Synchronous surface; an HTTP layer mounts this when one is deployed.
    let service = AuthzService::new(validator, engine, events);

    let mut coordinator = ShutdownCoordinator::new();
    coordinator.spawn(
        "key-set-refresh",
        Arc::clone(&key_sets).run_refresh_loop(config.key_set_refresh_interval(), coordinator.token()),
    );
    coordinator.spawn(
        "decision-cache-sweeper",
        Arc::clone(&cache).run_sweeper(config.decision_cache_sweep_interval(), coordinator.token()),
    );
    let bridge_cancel = coordinator.token();
    coordinator.spawn("message-bridge", async move { bridge.run(bridge_cancel).await });

    info!(
        request_topic = %config.request_topic,
        response_topic = %config.response_topic,
        consumer_group = %config.consumer_group,
        "Authorization Service running"
    );

    wait_for_signal().await;
    coordinator.shutdown(config.shutdown_timeout()).await;
    drop(service);

    info!("Authorization Service stopped");
    Ok(())
}
