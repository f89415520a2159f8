//! In-memory cache backend
//!
//! Entries live in a `DashMap` so concurrent requests never contend on a
//! global lock. Each entry carries its own expiry; expired entries are
//! dropped lazily on access and eagerly when the cache needs room. When the
//! cache is full the oldest entries are evicted first.

use crate::{
    config::MemoryCacheConfig,
    error::{CacheError, CacheResult},
    key::CacheKey,
    stats::{AtomicCacheMetrics, CacheStats},
    traits::AsyncCache,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct MemoryCacheEntry {
    value: Bytes,
    created_at: Instant,
    /// `None` when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl MemoryCacheEntry {
    fn new(value: Bytes, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            expires_at: now.checked_add(ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    fn size_bytes(&self) -> usize {
        self.value.len()
    }
}

/// Concurrent in-memory cache with per-entry TTL
#[derive(Debug)]
pub struct MemoryCache<K: CacheKey> {
    storage: DashMap<K, Arc<MemoryCacheEntry>>,
    config: MemoryCacheConfig,
    memory_usage: AtomicUsize,
    metrics: AtomicCacheMetrics,
}

impl<K: CacheKey> MemoryCache<K> {
    /// Create a new memory cache with the given configuration
    pub fn new(config: MemoryCacheConfig) -> CacheResult<Self> {
        config
            .validate()
            .map_err(CacheError::InvalidConfiguration)?;

        Ok(Self {
            storage: DashMap::with_capacity(config.max_entries.min(1024)),
            config,
            memory_usage: AtomicUsize::new(0),
            metrics: AtomicCacheMetrics::new(),
        })
    }

    /// Configuration this cache was built with
    pub fn config(&self) -> &MemoryCacheConfig {
        &self.config
    }

    /// Remove `key` if it still maps to an expired entry.
    fn remove_if_expired(&self, key: &K) {
        if let Some((_, entry)) = self.storage.remove_if(key, |_, entry| entry.is_expired()) {
            self.memory_usage
                .fetch_sub(entry.size_bytes(), Ordering::Relaxed);
            self.metrics.record_expiration();
        }
    }

    fn over_capacity(&self, incoming_bytes: usize) -> bool {
        self.storage.len() >= self.config.max_entries
            || self.config.max_memory_bytes.is_some_and(|max| {
                self.memory_usage.load(Ordering::Relaxed) + incoming_bytes > max
            })
    }

    /// Drop expired entries, then the oldest ones, until `incoming_bytes` fits.
    fn make_room(&self, incoming_bytes: usize) {
        if !self.over_capacity(incoming_bytes) {
            return;
        }

        let expired: Vec<K> = self
            .storage
            .iter()
            .filter(|entry| entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect();
        for key in expired {
            self.remove_if_expired(&key);
        }

        if !self.over_capacity(incoming_bytes) {
            return;
        }

        let mut candidates: Vec<(K, Instant)> = self
            .storage
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().created_at))
            .collect();
        candidates.sort_by_key(|(_, created_at)| *created_at);

        let mut evicted = 0usize;
        for (key, _) in candidates {
            if !self.over_capacity(incoming_bytes) {
                break;
            }
            if let Some((_, entry)) = self.storage.remove(&key) {
                self.memory_usage
                    .fetch_sub(entry.size_bytes(), Ordering::Relaxed);
                self.metrics.record_eviction();
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(evicted, "memory cache evicted entries to make room");
        }
    }

    /// Current statistics snapshot
    pub fn cache_stats(&self) -> CacheStats {
        self.metrics.snapshot(
            self.storage.len(),
            self.memory_usage.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl<K: CacheKey + 'static> AsyncCache<K> for MemoryCache<K> {
    async fn get(&self, key: &K) -> CacheResult<Option<Bytes>> {
        let value = self
            .storage
            .get(key)
            .map(|entry| (entry.is_expired(), entry.value.clone()));

        match value {
            Some((false, value)) => {
                self.metrics.record_get(true);
                Ok(Some(value))
            }
            Some((true, _)) => {
                self.remove_if_expired(key);
                self.metrics.record_get(false);
                Ok(None)
            }
            None => {
                self.metrics.record_get(false);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: K, value: Bytes) -> CacheResult<()> {
        let ttl = self.config.default_ttl;
        self.put_with_ttl(key, value, ttl).await
    }

    async fn put_with_ttl(&self, key: K, value: Bytes, ttl: Duration) -> CacheResult<()> {
        let size_bytes = value.len();
        if self
            .config
            .max_memory_bytes
            .is_some_and(|max| size_bytes > max)
        {
            return Err(CacheError::CapacityExceeded);
        }

        // An overwrite frees the old payload first
        if let Some((_, old)) = self.storage.remove(&key) {
            self.memory_usage
                .fetch_sub(old.size_bytes(), Ordering::Relaxed);
        }

        self.make_room(size_bytes);

        let entry = Arc::new(MemoryCacheEntry::new(value, ttl));
        if let Some(old) = self.storage.insert(key, entry) {
            // A concurrent writer won the race for this key
            self.memory_usage
                .fetch_sub(old.size_bytes(), Ordering::Relaxed);
        }
        self.memory_usage.fetch_add(size_bytes, Ordering::Relaxed);
        self.metrics.record_put();
        Ok(())
    }

    async fn contains(&self, key: &K) -> CacheResult<bool> {
        let expired = self.storage.get(key).map(|entry| entry.is_expired());
        match expired {
            Some(false) => Ok(true),
            Some(true) => {
                self.remove_if_expired(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, key: &K) -> CacheResult<bool> {
        if let Some((_, entry)) = self.storage.remove(key) {
            self.memory_usage
                .fetch_sub(entry.size_bytes(), Ordering::Relaxed);
            self.metrics.record_remove();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        self.storage.clear();
        self.memory_usage.store(0, Ordering::Relaxed);
        self.metrics.reset();
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(self.cache_stats())
    }

    async fn size(&self) -> CacheResult<usize> {
        Ok(self.storage.len())
    }
}
