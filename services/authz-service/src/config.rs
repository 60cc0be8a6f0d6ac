//! Type-Safe Configuration with Validation
//!
//! Settings are resolved from the process environment first and fall back to
//! an optional settings file (`AUTHZ_CONFIG_FILE`, default
//! `authz-service.toml`). A missing identity-provider domain or audience is a
//! fatal startup error.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Default location of the fallback settings file.
pub const DEFAULT_CONFIG_FILE: &str = "authz-service.toml";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid URL format
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl {
        /// Setting name
        field: String,
        /// Parser diagnostic
        reason: String,
    },

    /// A duration or interval that must be positive is zero
    #[error("Invalid {0}: must be greater than 0")]
    ZeroDuration(&'static str),

    /// Missing required field
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Value present but unparsable
    #[error("Failed to parse {name}: {reason}")]
    ParseError {
        /// Setting name
        name: String,
        /// Parser diagnostic
        reason: String,
    },

    /// Settings file present but unreadable
    #[error("Failed to read settings file: {0}")]
    File(#[from] config::ConfigError),
}

/// Broker the service connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerTransport {
    /// Kafka cluster at the configured bootstrap servers
    Kafka,
    /// In-process broker; nothing outside the process can reach it
    InMemory,
}

impl FromStr for BrokerTransport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kafka" => Ok(Self::Kafka),
            "memory" | "in-memory" => Ok(Self::InMemory),
            other => Err(format!("unknown broker transport '{other}' (expected kafka or memory)")),
        }
    }
}

impl fmt::Display for BrokerTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Kafka => "kafka",
            Self::InMemory => "memory",
        })
    }
}

/// Service configuration with validation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity-provider domain (e.g. `tenant.eu.auth0.com`)
    pub auth0_domain: String,
    /// Audience every accepted token must carry
    pub audience: String,
    /// Issuer every accepted token must carry
    pub issuer: String,
    /// Discovery document listing the signing keys
    pub jwks_url: Url,
    /// Namespaced claim carrying roles
    pub roles_claim: String,
    /// Scheduled key-set refresh interval in seconds
    pub key_set_refresh_interval_secs: u64,
    /// Bounded timeout for discovery fetches in seconds
    pub discovery_timeout_secs: u64,
    /// Clock skew tolerated on exp/nbf in seconds
    pub clock_skew_secs: u64,
    /// Whether decisions are cached
    pub decision_cache_enabled: bool,
    /// Decision lifetime in seconds
    pub decision_cache_ttl_secs: u64,
    /// Interval between expired-entry sweeps in seconds
    pub decision_cache_sweep_interval_secs: u64,
    /// Broker the bridge and event publisher connect to
    pub broker_transport: BrokerTransport,
    /// Broker endpoints
    pub broker_bootstrap_servers: Vec<String>,
    /// Consumer group for the authorization request topic
    pub consumer_group: String,
    /// Inbound authorization request topic
    pub request_topic: String,
    /// Outbound authorization response topic
    pub response_topic: String,
    /// Outbound lifecycle event topic
    pub user_topic: String,
    /// Bounded broker poll wait in milliseconds
    pub poll_timeout_ms: u64,
    /// Bound on waiting for a publish acknowledgment in milliseconds
    pub delivery_timeout_ms: u64,
    /// Publish retries after the first attempt
    pub publish_max_retries: u32,
    /// Fixed backoff between publish retries in milliseconds
    pub publish_retry_backoff_ms: u64,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON log records
    pub log_json: bool,
}

impl Config {
    /// Loads configuration from `.env`, the environment and the settings file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required setting is missing or any value
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = env::var("AUTHZ_CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let file = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .build()?;

        Self::layered(|name| env::var(name).ok(), &file)
    }

    /// Resolves each setting from `env` first, then from `file`, where keys
    /// are the lower-case variable names (`auth0_domain`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required setting is missing or any value
    /// fails validation.
    pub fn layered<F>(env: F, file: &config::Config) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_lookup(|name| env(name).or_else(|| file.get_string(&name.to_lowercase()).ok()))
    }

    /// Builds configuration from an arbitrary name → value lookup.
    ///
    /// Names are the upper-case environment variable names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required setting is missing or any value
    /// fails validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let auth0_domain = get("AUTH0_DOMAIN")
            .ok_or_else(|| ConfigError::MissingRequired("AUTH0_DOMAIN".to_string()))?;
        let audience = get("AUTH0_AUDIENCE")
            .ok_or_else(|| ConfigError::MissingRequired("AUTH0_AUDIENCE".to_string()))?;
        let domain = bare_domain(&auth0_domain);

        let issuer = get("AUTH0_ISSUER").unwrap_or_else(|| format!("https://{domain}/"));
        let jwks_url = parse_url(
            "JWKS_URL",
            &get("JWKS_URL").unwrap_or_else(|| format!("https://{domain}/.well-known/jwks.json")),
        )?;

        let config = Self {
            auth0_domain: domain,
            audience,
            issuer,
            jwks_url,
            roles_claim: get("ROLES_CLAIM").unwrap_or_else(|| "https://babbly.com/roles".to_string()),
            key_set_refresh_interval_secs: parse_or(&get, "KEY_SET_REFRESH_INTERVAL", 3600)?,
            discovery_timeout_secs: parse_or(&get, "DISCOVERY_TIMEOUT", 10)?,
            clock_skew_secs: parse_or(&get, "CLOCK_SKEW", 300)?,
            decision_cache_enabled: parse_or(&get, "DECISION_CACHE_ENABLED", true)?,
            decision_cache_ttl_secs: parse_or(&get, "DECISION_CACHE_TTL", 60)?,
            decision_cache_sweep_interval_secs: parse_or(&get, "DECISION_CACHE_SWEEP_INTERVAL", 60)?,
            broker_transport: parse_or(&get, "BROKER_TRANSPORT", BrokerTransport::Kafka)?,
            broker_bootstrap_servers: get("KAFKA_BOOTSTRAP_SERVERS")
                .map(|v| parse_list(&v))
                .unwrap_or_else(|| vec!["localhost:9092".to_string()]),
            consumer_group: get("KAFKA_CONSUMER_GROUP").unwrap_or_else(|| "babbly-auth-group".to_string()),
            request_topic: get("KAFKA_AUTH_REQUEST_TOPIC").unwrap_or_else(|| "auth-requests".to_string()),
            response_topic: get("KAFKA_AUTH_RESPONSE_TOPIC").unwrap_or_else(|| "auth-responses".to_string()),
            user_topic: get("KAFKA_USER_TOPIC").unwrap_or_else(|| "user-events".to_string()),
            poll_timeout_ms: parse_or(&get, "BROKER_POLL_TIMEOUT_MS", 1000)?,
            delivery_timeout_ms: parse_or(&get, "BROKER_DELIVERY_TIMEOUT_MS", 30_000)?,
            publish_max_retries: parse_or(&get, "PUBLISH_MAX_RETRIES", 3)?,
            publish_retry_backoff_ms: parse_or(&get, "PUBLISH_RETRY_BACKOFF_MS", 1000)?,
            shutdown_timeout_secs: parse_or(&get, "SHUTDOWN_TIMEOUT", 30)?,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_json: get("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.key_set_refresh_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("KEY_SET_REFRESH_INTERVAL"));
        }
        if self.discovery_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("DISCOVERY_TIMEOUT"));
        }
        if self.decision_cache_ttl_secs == 0 {
            return Err(ConfigError::ZeroDuration("DECISION_CACHE_TTL"));
        }
        if self.decision_cache_sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("DECISION_CACHE_SWEEP_INTERVAL"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("BROKER_POLL_TIMEOUT_MS"));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("BROKER_DELIVERY_TIMEOUT_MS"));
        }
        if self.broker_bootstrap_servers.is_empty() {
            return Err(ConfigError::MissingRequired("KAFKA_BOOTSTRAP_SERVERS".to_string()));
        }
        for (name, topic) in [
            ("KAFKA_AUTH_REQUEST_TOPIC", &self.request_topic),
            ("KAFKA_AUTH_RESPONSE_TOPIC", &self.response_topic),
            ("KAFKA_USER_TOPIC", &self.user_topic),
        ] {
            if topic.is_empty() {
                return Err(ConfigError::MissingRequired(name.to_string()));
            }
        }
        Ok(())
    }

    /// Gets the JWKS URL as a string.
    #[must_use]
    pub fn jwks_url_str(&self) -> &str {
        self.jwks_url.as_str()
    }

    /// Scheduled key-set refresh interval.
    #[must_use]
    pub const fn key_set_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.key_set_refresh_interval_secs)
    }

    /// Discovery fetch timeout.
    #[must_use]
    pub const fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    /// Clock-skew tolerance.
    #[must_use]
    pub const fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    /// Decision cache lifetime.
    #[must_use]
    pub const fn decision_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.decision_cache_ttl_secs)
    }

    /// Decision cache sweep interval.
    #[must_use]
    pub const fn decision_cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.decision_cache_sweep_interval_secs)
    }

    /// Broker poll wait.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Publish acknowledgment bound.
    #[must_use]
    pub const fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// Fixed backoff between publish retries.
    #[must_use]
    pub const fn publish_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_retry_backoff_ms)
    }

    /// Graceful shutdown bound.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Parse an optional setting with a default value.
fn parse_or<T, G>(get: &G, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(val) => val.parse().map_err(|e: T::Err| ConfigError::ParseError {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field: name.to_string(),
        reason: e.to_string(),
    })
}

/// Host part of a domain setting, with any scheme and trailing slash removed.
fn bare_domain(value: &str) -> String {
    let without_scheme = match value.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphabetic()) => rest,
        _ => value,
    };
    without_scheme.trim_end_matches('/').to_string()
}

/// Parse a comma-separated list.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
