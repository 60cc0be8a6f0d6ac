//! Authorization Service - token validation and access decisions.
//!
//! This crate validates identity-provider bearer tokens against a cached
//! signing key set, evaluates resource/operation policy with a decision
//! cache, answers authorization requests arriving over a message broker and
//! publishes user lifecycle events.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authz;
pub mod broker;
pub mod config;
pub mod error;
pub mod identity;
pub mod jwt;
pub mod observability;
pub mod service;
pub mod shutdown;

pub use authz::{AuthorizationDecision, AuthorizationEngine, AuthorizationQuery, DecisionCache, PolicySet};
pub use broker::{EventPublisher, InMemoryBroker, LifecycleEvent, MessageBridge};
pub use config::Config;
pub use error::{AuthzError, ErrorCode};
pub use identity::{Identity, UserProfile};
pub use jwt::{KeySetCache, TokenValidator};
pub use service::AuthzService;
