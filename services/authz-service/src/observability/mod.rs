//! Prometheus metrics for the authorization service.
//!
//! Logging goes through `tracing`, initialised by `rust_common::init_tracing`.

pub mod metrics;

pub use metrics::{BridgeOutcome, ServiceMetrics};
