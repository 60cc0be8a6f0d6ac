//! Signing key set cache with single-flight refresh.
//!
//! The cache holds the identity provider's current [`SigningKeySet`]:
//! - the set is replaced wholesale on every successful fetch, never edited
//! - concurrent refresh requests share one in-flight fetch
//! - a failed refresh keeps serving the previous set when one exists
//! - with no previous set, callers get [`AuthzError::DiscoveryUnavailable`]

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use jsonwebtoken::{Algorithm, DecodingKey};
use rust_common::{HttpConfig, PlatformError, build_http_client};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::AuthzError;
use crate::observability::ServiceMetrics;

/// Minimum RSA modulus length in base64url characters (2048-bit keys).
const MIN_RSA_MODULUS_B64_LEN: usize = 340;

/// JSON Web Key structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (RSA, EC)
    pub kty: String,
    /// Key ID
    #[serde(default)]
    pub kid: Option<String>,
    /// Key use (sig, enc)
    #[serde(rename = "use", default)]
    pub key_use: Option<String>,
    /// Algorithm
    #[serde(default)]
    pub alg: Option<String>,
    /// RSA modulus
    #[serde(default)]
    pub n: Option<String>,
    /// RSA exponent
    #[serde(default)]
    pub e: Option<String>,
    /// EC x coordinate
    #[serde(default)]
    pub x: Option<String>,
    /// EC y coordinate
    #[serde(default)]
    pub y: Option<String>,
    /// EC curve
    #[serde(default)]
    pub crv: Option<String>,
}

/// Discovery document: the identity provider's published key set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// List of keys
    pub keys: Vec<Jwk>,
}

/// One verification key.
#[derive(Clone)]
pub struct SigningKey {
    /// Key id advertised in token headers
    pub kid: String,
    /// Algorithm the key verifies
    pub algorithm: Algorithm,
    key: DecodingKey,
}

impl SigningKey {
    /// Key material for signature verification.
    #[must_use]
    pub const fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of the identity provider's signing keys.
#[derive(Debug)]
pub struct SigningKeySet {
    keys: Vec<SigningKey>,
    fetched_at: Instant,
}

impl SigningKeySet {
    /// Builds a key set, skipping keys that are unusable for signature checks.
    #[must_use]
    pub fn from_jwks(jwks: &Jwks) -> Self {
        let mut seen = HashSet::new();
        let keys = jwks
            .keys
            .iter()
            .filter_map(jwk_to_signing_key)
            .filter(|key| seen.insert(key.kid.clone()))
            .collect();

        Self {
            keys,
            fetched_at: Instant::now(),
        }
    }

    /// Looks up a key by id.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// Key ids in publication order.
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.kid.as_str())
    }

    /// Number of usable keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when the set holds no usable key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Time since the set was fetched.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Converts a JWK to a signing key.
fn jwk_to_signing_key(jwk: &Jwk) -> Option<SigningKey> {
    let kid = jwk.kid.clone().filter(|k| !k.is_empty())?;

    if jwk.key_use.as_deref().is_some_and(|u| u != "sig") {
        debug!(kid = %kid, "Skipping non-signature key");
        return None;
    }

    let declared = match jwk.alg.as_deref() {
        Some(alg) => match Algorithm::from_str(alg) {
            Ok(alg) => Some(alg),
            Err(_) => {
                warn!(kid = %kid, alg = %alg, "Unsupported key algorithm, rejecting");
                return None;
            }
        },
        None => None,
    };

    let (key, algorithm) = match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref()?;
            let e = jwk.e.as_deref()?;

            if n.len() < MIN_RSA_MODULUS_B64_LEN {
                warn!(kid = %kid, "RSA key too small, rejecting");
                return None;
            }

            let algorithm = declared.unwrap_or(Algorithm::RS256);
            if !matches!(
                algorithm,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ) {
                warn!(kid = %kid, ?algorithm, "Algorithm does not fit an RSA key, rejecting");
                return None;
            }

            (DecodingKey::from_rsa_components(n, e).ok()?, algorithm)
        }
        "EC" => {
            let x = jwk.x.as_deref()?;
            let y = jwk.y.as_deref()?;
            let algorithm = match (jwk.crv.as_deref().unwrap_or("P-256"), declared) {
                ("P-256", None | Some(Algorithm::ES256)) => Algorithm::ES256,
                ("P-384", None | Some(Algorithm::ES384)) => Algorithm::ES384,
                (crv, _) => {
                    warn!(kid = %kid, crv = %crv, "Unsupported EC curve, rejecting");
                    return None;
                }
            };

            (DecodingKey::from_ec_components(x, y).ok()?, algorithm)
        }
        other => {
            warn!(kty = %other, "Unsupported key type");
            return None;
        }
    };

    Some(SigningKey {
        kid,
        algorithm,
        key,
    })
}

/// Where discovery documents come from.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetches the current discovery document.
    async fn fetch(&self) -> Result<Jwks, AuthzError>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

/// Fetches the discovery document over HTTPS with a bounded timeout.
pub struct HttpKeySetSource {
    url: Url,
    client: reqwest::Client,
}

impl HttpKeySetSource {
    /// Creates a source for `url` whose requests never outlive `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, AuthzError> {
        let client = build_http_client(&HttpConfig::default().with_timeout(timeout))
            .map_err(PlatformError::from)?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> Result<Jwks, AuthzError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::status(status.as_u16(), self.url.as_str()).into());
        }

        Ok(response.json::<Jwks>().await?)
    }

    fn location(&self) -> String {
        self.url.to_string()
    }
}

type InflightFetch = Shared<BoxFuture<'static, Result<Arc<SigningKeySet>, String>>>;

/// Signing key set cache with single-flight refresh and stale fallback.
pub struct KeySetCache {
    source: Arc<dyn KeySetSource>,
    current: Arc<ArcSwapOption<SigningKeySet>>,
    max_age: Duration,
    inflight: Mutex<Option<InflightFetch>>,
    fetches: Arc<AtomicU64>,
    metrics: Option<Arc<ServiceMetrics>>,
}

impl KeySetCache {
    /// Creates an empty cache; sets older than `max_age` are refreshed on access.
    pub fn new(source: Arc<dyn KeySetSource>, max_age: Duration) -> Self {
        Self {
            source,
            current: Arc::new(ArcSwapOption::empty()),
            max_age,
            inflight: Mutex::new(None),
            fetches: Arc::new(AtomicU64::new(0)),
            metrics: None,
        }
    }

    /// Records refresh outcomes in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the current key set, fetching it first if absent or stale.
    ///
    /// # Errors
    ///
    /// [`AuthzError::DiscoveryUnavailable`] when the fetch fails and no set
    /// was ever fetched.
    pub async fn get_key_set(&self) -> Result<Arc<SigningKeySet>, AuthzError> {
        self.get_key_set_fresh().await.map(|(set, _)| set)
    }

    /// Like [`KeySetCache::get_key_set`], also reporting whether a refresh
    /// ran during this call.
    ///
    /// # Errors
    ///
    /// [`AuthzError::DiscoveryUnavailable`] when the fetch fails and no set
    /// was ever fetched.
    pub async fn get_key_set_fresh(&self) -> Result<(Arc<SigningKeySet>, bool), AuthzError> {
        if let Some(set) = self.current() {
            if set.age() < self.max_age {
                return Ok((set, false));
            }
        }
        self.refresh().await.map(|set| (set, true))
    }

    /// Fetches a new key set even if the current one is fresh.
    ///
    /// Joins a fetch that is already in flight instead of starting another.
    ///
    /// # Errors
    ///
    /// [`AuthzError::DiscoveryUnavailable`] when the fetch fails and no set
    /// was ever fetched.
    #[instrument(skip(self), fields(source = %self.source.location()))]
    pub async fn refresh(&self) -> Result<Arc<SigningKeySet>, AuthzError> {
        match self.refresh_single_flight().await {
            Ok(set) => Ok(set),
            Err(reason) => match self.current() {
                Some(stale) => {
                    warn!(
                        error = %reason,
                        age_secs = stale.age().as_secs(),
                        "Key set refresh failed, serving previous key set"
                    );
                    Ok(stale)
                }
                None => Err(AuthzError::DiscoveryUnavailable { reason }),
            },
        }
    }

    /// Most recently fetched key set, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<SigningKeySet>> {
        self.current.load_full()
    }

    /// Checks if the cached set is missing or older than the refresh interval.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.current().is_none_or(|set| set.age() >= self.max_age)
    }

    /// Number of physical discovery fetches started so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Refreshes the key set every `interval` until `cancel` fires.
    pub async fn run_refresh_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "Key set refresh task started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "Scheduled key set refresh failed");
                    }
                }
            }
        }
        info!("Key set refresh task stopped");
    }

    async fn refresh_single_flight(&self) -> Result<Arc<SigningKeySet>, String> {
        let mut inflight_guard = self.inflight.lock().await;

        if let Some(fut) = inflight_guard.as_ref() {
            // A finished fetch left behind by a cancelled initiator is not reused.
            if fut.peek().is_none() {
                let fut = fut.clone();
                drop(inflight_guard);
                return fut.await;
            }
        }

        let source = Arc::clone(&self.source);
        let current = Arc::clone(&self.current);
        let fetches = Arc::clone(&self.fetches);
        let metrics = self.metrics.clone();

        let fut: BoxFuture<'static, Result<Arc<SigningKeySet>, String>> = Box::pin(async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            info!(source = %source.location(), "Fetching signing key set");

            let outcome = match source.fetch().await {
                Ok(jwks) => {
                    let set = Arc::new(SigningKeySet::from_jwks(&jwks));
                    current.store(Some(Arc::clone(&set)));
                    info!(keys = set.len(), "Signing key set updated");
                    Ok(set)
                }
                Err(e) => Err(e.to_string()),
            };

            if let Some(metrics) = metrics {
                metrics.record_key_set_refresh(outcome.is_ok());
            }
            outcome
        });

        let shared = fut.shared();
        *inflight_guard = Some(shared.clone());
        drop(inflight_guard);

        let result = shared.clone().await;
        let mut inflight_guard = self.inflight.lock().await;
        if inflight_guard.as_ref().is_some_and(|f| f.ptr_eq(&shared)) {
            *inflight_guard = None;
        }
        result
    }
}
