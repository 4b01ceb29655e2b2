//! LRU cache for final verification results.
//!
//! Once a transaction has been verified with enough confirmations its outcome
//! cannot change, so manual re-verification of the same payment does not need
//! another chain round-trip. Only successful results are cached.

use super::VerificationResult;
use lru::LruCache;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default cache capacity.
const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Everything a verification outcome depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VerificationKey {
    /// Currency code.
    pub currency: String,
    /// Transaction reference.
    pub tx_ref: String,
    /// Expected receiving address, lowercased.
    pub address: String,
    /// Expected amount, normalized.
    pub amount: Decimal,
}

impl VerificationKey {
    /// Build a key from verification inputs.
    #[must_use]
    pub fn new(currency: &str, tx_ref: &str, address: &str, amount: Decimal) -> Self {
        Self {
            currency: currency.to_string(),
            tx_ref: tx_ref.to_string(),
            address: address.trim().to_ascii_lowercase(),
            amount: amount.normalize(),
        }
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries added.
    pub additions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// LRU cache of successful verifications.
#[derive(Clone)]
pub struct VerificationCache {
    inner: Arc<Mutex<LruCache<VerificationKey, VerificationResult>>>,
    stats: Arc<Mutex<CacheStats>>,
}

impl VerificationCache {
    /// Create a cache with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `capacity` results (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(CacheStats::default())),
        }
    }

    /// Look up a cached result.
    pub fn get(&self, key: &VerificationKey) -> Option<VerificationResult> {
        let found = self.inner.lock().get(key).cloned();

        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }

        found
    }

    /// Cache a result. Failed results are ignored.
    pub fn insert(&self, key: VerificationKey, result: VerificationResult) {
        if !result.verified {
            return;
        }
        self.inner.lock().put(key, result);
        self.stats.lock().additions += 1;
    }

    /// Drop a cached result, if any.
    pub fn remove(&self, key: &VerificationKey) {
        self.inner.lock().pop(key);
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Number of cached results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for VerificationCache {
    fn default() -> Self {
        Self::new()
    }
}
