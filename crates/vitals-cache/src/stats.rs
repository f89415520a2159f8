//! Cache statistics
//!
//! Backends record operations into [`AtomicCacheMetrics`] from any number of
//! concurrent tasks and hand out [`CacheStats`] snapshots.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total number of get operations
    pub get_count: u64,
    /// Number of successful cache hits
    pub hit_count: u64,
    /// Number of cache misses, including expired entries
    pub miss_count: u64,
    /// Total number of put operations
    pub put_count: u64,
    /// Total number of remove operations
    pub remove_count: u64,
    /// Entries evicted to stay within capacity
    pub eviction_count: u64,
    /// Entries dropped because their TTL elapsed
    pub expiration_count: u64,
    /// Current number of entries in cache
    pub entry_count: usize,
    /// Total payload bytes held
    pub memory_usage_bytes: usize,
}

impl CacheStats {
    /// Fraction of gets that were hits, 0.0 when there were no gets
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        if self.get_count == 0 {
            0.0
        } else {
            self.hit_count as f64 / self.get_count as f64
        }
    }
}

/// Lock-free operation counters shared by a backend
#[derive(Debug, Default)]
pub struct AtomicCacheMetrics {
    get_count: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    put_count: AtomicU64,
    remove_count: AtomicU64,
    eviction_count: AtomicU64,
    expiration_count: AtomicU64,
}

impl AtomicCacheMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a get and whether it hit
    #[inline]
    pub fn record_get(&self, hit: bool) {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a put
    #[inline]
    pub fn record_put(&self) {
        self.put_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an explicit removal
    #[inline]
    pub fn record_remove(&self) {
        self.remove_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a capacity eviction
    #[inline]
    pub fn record_eviction(&self) {
        self.eviction_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a TTL expiration
    #[inline]
    pub fn record_expiration(&self) {
        self.expiration_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.get_count,
            &self.hit_count,
            &self.miss_count,
            &self.put_count,
            &self.remove_count,
            &self.eviction_count,
            &self.expiration_count,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Snapshot the counters; entry and byte totals come from the backend
    pub fn snapshot(&self, entry_count: usize, memory_usage_bytes: usize) -> CacheStats {
        CacheStats {
            get_count: self.get_count.load(Ordering::Relaxed),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            put_count: self.put_count.load(Ordering::Relaxed),
            remove_count: self.remove_count.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
            expiration_count: self.expiration_count.load(Ordering::Relaxed),
            entry_count,
            memory_usage_bytes,
        }
    }
}
