//! Decision cache.
//!
//! Entries live in a fixed number of shards, each behind its own lock, so the
//! synchronous path and the message bridge rarely contend. Expired entries
//! are evicted lazily on lookup and by a periodic sweep. Disabling the cache
//! turns every operation into a no-op.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::authz::policy::AuthorizationDecision;
use crate::authz::query::CacheKey;

const DEFAULT_SHARDS: usize = 16;

#[derive(Debug, Clone)]
struct CacheEntry {
    decision: AuthorizationDecision,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Entries currently held, expired ones included
    pub entries: usize,
}

/// Concurrent TTL cache of authorization decisions.
#[derive(Debug)]
pub struct DecisionCache {
    shards: Vec<RwLock<HashMap<CacheKey, CacheEntry>>>,
    ttl: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DecisionCache {
    /// Enabled cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self::build(ttl, true)
    }

    /// Cache that never stores anything.
    pub fn disabled() -> Self {
        Self::build(Duration::ZERO, false)
    }

    fn build(ttl: Duration, enabled: bool) -> Self {
        Self {
            shards: (0..DEFAULT_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            ttl,
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &CacheKey) -> &RwLock<HashMap<CacheKey, CacheEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let len = self.shards.len() as u64;
        // The modulo result is below the shard count, which fits in usize.
        let index = usize::try_from(hasher.finish() % len).unwrap_or_default();
        &self.shards[index]
    }

    /// Cached decision for `key`, unless absent or expired.
    pub fn get(&self, key: &CacheKey) -> Option<AuthorizationDecision> {
        if !self.enabled {
            return None;
        }

        let shard = self.shard(key);
        let now = Instant::now();

        let expired = {
            let guard = shard.read();
            match guard.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.decision.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut guard = shard.write();
            if guard.get(key).is_some_and(|e| e.is_expired(now)) {
                guard.remove(key);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Inserts or replaces the decision for `key`.
    pub fn insert(&self, key: CacheKey, decision: AuthorizationDecision) {
        if !self.enabled {
            return;
        }
        let entry = CacheEntry {
            decision,
            inserted_at: Instant::now(),
            ttl: self.ttl,
        };
        self.shard(&key).write().insert(key, entry);
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .map(|shard| {
                let mut guard = shard.write();
                let before = guard.len();
                guard.retain(|_, entry| !entry.is_expired(now));
                before - guard.len()
            })
            .sum()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    /// Number of entries held, expired ones included.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// True when no entry is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the cache stores anything at all.
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Entry lifetime.
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Sweeps every `interval` until `cancel` fires.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        if !self.enabled {
            return;
        }
        info!(interval_secs = interval.as_secs(), "Decision cache sweeper started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {
                    let removed = self.sweep();
                    if removed > 0 {
                        debug!(removed, "Swept expired decisions");
                    }
                }
            }
        }
        info!("Decision cache sweeper stopped");
    }
}
