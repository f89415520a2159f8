//! Core cache backend trait
//!
//! Backends store opaque byte payloads under a [`CacheKey`] with a per-entry
//! TTL. Implementations must be `Send + Sync`; the router shares one backend
//! across all in-flight requests.

#![allow(missing_docs)]

use crate::{error::CacheResult, key::CacheKey, stats::CacheStats};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Core async cache trait
#[async_trait]
pub trait AsyncCache<K: CacheKey>: Send + Sync {
    /// Returns None if expired.
    async fn get(&self, key: &K) -> CacheResult<Option<Bytes>>;

    /// Uses the default TTL configured for the cache.
    async fn put(&self, key: K, value: Bytes) -> CacheResult<()>;

    /// Overwrites any existing entry.
    async fn put_with_ttl(&self, key: K, value: Bytes, ttl: Duration) -> CacheResult<()>;

    /// Returns false for expired entries.
    async fn contains(&self, key: &K) -> CacheResult<bool>;

    /// Returns true if the key was present and removed.
    async fn remove(&self, key: &K) -> CacheResult<bool>;

    async fn clear(&self) -> CacheResult<()>;

    async fn stats(&self) -> CacheResult<CacheStats>;

    /// Entry count, not byte size.
    async fn size(&self) -> CacheResult<usize>;

    async fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.size().await? == 0)
    }
}
