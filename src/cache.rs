//! LRU-bounded TTL cache.
//!
//! Expiry is checked lazily on read: an entry whose deadline has passed is
//! removed and reported as a miss. The LRU capacity bounds memory; no
//! background sweep is needed for correctness.

use crate::clock::SharedClock;
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

/// Default capacity, sized for per-process listing/deeplink workloads.
const DEFAULT_CAPACITY: usize = 10_000;

struct Entry<V> {
    value: V,
    expires_at_ms: i64,
}

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of misses, including lazy expiries.
    pub misses: u64,
    /// Number of entries added.
    pub additions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Generic expiring key/value store shared across components.
///
/// Each `insert` carries its own TTL, so one cache instance can serve
/// call sites with very different lifetimes (verification snapshots for
/// minutes, affiliate link mappings for ~24h).
#[derive(Clone)]
pub struct TtlCache<K: Hash + Eq, V: Clone> {
    inner: Arc<Mutex<LruCache<K, Entry<V>>>>,
    stats: Arc<Mutex<CacheStats>>,
    clock: SharedClock,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    /// Create a cache with the default capacity.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, clock)
    }

    /// Create a cache bounded to `capacity` live entries.
    #[must_use]
    pub fn with_capacity(capacity: usize, clock: SharedClock) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(CacheStats::default())),
            clock,
        }
    }

    /// Look up `key`, treating an expired entry as a miss and dropping it.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now_ms();
        let mut cache = self.inner.lock();

        let expired = matches!(cache.get(key), Some(entry) if entry.expires_at_ms <= now);
        if expired {
            cache.pop(key);
        }
        let value = cache.get(key).map(|entry| entry.value.clone());

        let mut stats = self.stats.lock();
        if value.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        value
    }

    /// Insert `value` under `key`, expiring after `ttl`.
    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        let expires_at_ms = self
            .clock
            .now_ms()
            .saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        self.inner.lock().put(
            key,
            Entry {
                value,
                expires_at_ms,
            },
        );
        self.stats.lock().additions += 1;
    }

    /// Remove `key` if present.
    pub fn remove(&self, key: &K) {
        self.inner.lock().pop(key);
    }

    /// Current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Number of stored entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
