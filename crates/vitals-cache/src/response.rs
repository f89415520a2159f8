//! Response cache for finished query payloads
//!
//! Wraps an [`AsyncCache`] backend with the TTL policy, an injected clock and
//! a small JSON envelope recording where the payload came from and when it was
//! written. The cache is best-effort: a failing backend degrades to a miss on
//! read and is ignored on write, so callers only ever see `Option`.

use crate::{
    clock::Clock,
    config::TtlPolicy,
    error::{CacheError, CacheResult},
    key::QueryKey,
    stats::CacheStats,
    traits::AsyncCache,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Where a response payload was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataSource {
    /// Recent data from the hot store
    Hot,
    /// Archival data from the cold store
    Cold,
    /// Hot and cold results merged
    Split,
    /// Served from the response cache
    Cache,
    /// Forwarded from the upstream API
    Upstream,
}

impl DataSource {
    /// Header value, e.g. `HOT`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "HOT",
            Self::Cold => "COLD",
            Self::Split => "SPLIT",
            Self::Cache => "CACHE",
            Self::Upstream => "UPSTREAM",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the response cache served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    /// Payload came from the cache
    Hit,
    /// Cache consulted, payload computed
    Miss,
    /// Cache not consulted
    Bypass,
}

impl CacheStatus {
    /// Header value, e.g. `HIT`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Bypass => "BYPASS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live cached payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    /// Payload bytes exactly as stored
    pub payload: Bytes,
    /// Source that originally produced the payload
    pub source: DataSource,
    /// When the payload was written
    pub written_at: DateTime<Utc>,
    /// TTL the payload was written with
    pub ttl: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    data: String,
    source: DataSource,
    written_at_ms: i64,
    ttl_secs: u64,
}

impl Envelope {
    fn encode(response: &CachedResponse) -> CacheResult<Bytes> {
        let envelope = Self {
            data: BASE64.encode(&response.payload),
            source: response.source,
            written_at_ms: response.written_at.timestamp_millis(),
            ttl_secs: response.ttl.as_secs(),
        };
        Ok(Bytes::from(serde_json::to_vec(&envelope)?))
    }

    fn decode(raw: &[u8]) -> CacheResult<CachedResponse> {
        let envelope: Self = serde_json::from_slice(raw)?;
        let payload = BASE64.decode(envelope.data.as_bytes())?;
        let written_at = DateTime::from_timestamp_millis(envelope.written_at_ms).ok_or_else(
            || CacheError::Deserialization(format!("bad timestamp {}", envelope.written_at_ms)),
        )?;

        Ok(CachedResponse {
            payload: Bytes::from(payload),
            source: envelope.source,
            written_at,
            ttl: Duration::from_secs(envelope.ttl_secs),
        })
    }
}

/// Response cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCacheStats {
    /// Lookups that returned a live payload
    pub hits: u64,
    /// Lookups that found nothing live
    pub misses: u64,
    /// Payloads written
    pub stores: u64,
    /// Backend or codec failures swallowed
    pub errors: u64,
    /// Entries currently held by the backend
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    errors: AtomicU64,
}

/// Best-effort TTL cache of finished query payloads.
pub struct ResponseCache {
    backend: Arc<dyn AsyncCache<QueryKey>>,
    policy: TtlPolicy,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("policy", &self.policy)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Create a response cache over `backend`.
    pub fn new<C>(backend: Arc<C>, policy: TtlPolicy, clock: Arc<dyn Clock>) -> Self
    where
        C: AsyncCache<QueryKey> + 'static,
    {
        Self {
            backend,
            policy,
            clock,
            counters: Counters::default(),
        }
    }

    /// TTL policy in effect.
    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// TTL for a range ending at `end`, evaluated now.
    pub fn ttl_for(&self, end: DateTime<Utc>) -> Duration {
        self.policy.ttl_for(end, self.clock.now())
    }

    /// Look up a live payload. Errors and stale entries are misses.
    pub async fn get(&self, key: &QueryKey) -> Option<CachedResponse> {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "response cache read failed, treating as miss");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let response = match Envelope::decode(&raw) {
            Ok(response) => response,
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable response cache entry");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if self.is_stale(&response) {
            debug!(key = %key, written_at = %response.written_at, "response cache entry expired");
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(response)
    }

    /// Store a payload under `key`, overwriting any previous entry.
    ///
    /// Failures are logged and swallowed.
    pub async fn put(&self, key: &QueryKey, payload: Bytes, source: DataSource, ttl: Duration) {
        let response = CachedResponse {
            payload,
            source,
            written_at: self.clock.now(),
            ttl,
        };

        let result = match Envelope::encode(&response) {
            Ok(raw) => self.backend.put_with_ttl(key.clone(), raw, ttl).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.counters.stores.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, source = %source, ttl_secs = ttl.as_secs(), "stored response");
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "response cache write failed, ignoring");
            }
        }
    }

    /// Drop the entry for `key`, if any.
    pub async fn invalidate(&self, key: &QueryKey) {
        if let Err(e) = self.backend.remove(key).await {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, error = %e, "response cache invalidation failed");
        }
    }

    /// Counter snapshot plus the backend's entry count.
    pub async fn stats(&self) -> ResponseCacheStats {
        let entries = match self.backend.stats().await {
            Ok(CacheStats { entry_count, .. }) => entry_count,
            Err(e) => {
                warn!(error = %e, "response cache backend stats unavailable");
                0
            }
        };

        ResponseCacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stores: self.counters.stores.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            entries,
        }
    }

    fn is_stale(&self, response: &CachedResponse) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(response.ttl) else {
            return false;
        };
        self.clock.now() - response.written_at > ttl
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, config::MemoryCacheConfig, memory_cache::MemoryCache};
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
            .single()
            .expect("valid test date")
    }

    fn key() -> QueryKey {
        QueryKey::new(
            "hq",
            &["ahu1.sat"],
            now() - chrono::Duration::days(3),
            now() - chrono::Duration::days(2),
        )
        .expect("Test operation should succeed")
    }

    fn memory_backed(clock: Arc<ManualClock>) -> ResponseCache {
        let backend: Arc<MemoryCache<QueryKey>> =
            Arc::new(MemoryCache::new(MemoryCacheConfig::new()).expect("valid config"));
        ResponseCache::new(backend, TtlPolicy::default(), clock)
    }

    #[derive(Debug)]
    struct FailingBackend;

    #[async_trait]
    impl AsyncCache<QueryKey> for FailingBackend {
        async fn get(&self, _key: &QueryKey) -> CacheResult<Option<Bytes>> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        async fn put(&self, _key: QueryKey, _value: Bytes) -> CacheResult<()> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        async fn put_with_ttl(&self, _k: QueryKey, _v: Bytes, _t: Duration) -> CacheResult<()> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        async fn contains(&self, _key: &QueryKey) -> CacheResult<bool> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        async fn remove(&self, _key: &QueryKey) -> CacheResult<bool> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        async fn clear(&self) -> CacheResult<()> {
            Ok(())
        }
        async fn stats(&self) -> CacheResult<CacheStats> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        async fn size(&self) -> CacheResult<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_round_trip_returns_identical_payload() {
        let cache = memory_backed(Arc::new(ManualClock::new(now())));
        let payload = Bytes::from_static(br#"{"point_samples":[]}"#);

        assert!(cache.get(&key()).await.is_none());
        cache
            .put(&key(), payload.clone(), DataSource::Cold, Duration::from_secs(60))
            .await;

        let hit = cache.get(&key()).await.expect("entry should be live");
        assert_eq!(hit.payload, payload);
        assert_eq!(hit.source, DataSource::Cold);
        assert_eq!(hit.written_at, now());

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.stores), (1, 1, 1));
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_entry_expires_against_injected_clock() {
        let clock = Arc::new(ManualClock::new(now()));
        let cache = memory_backed(Arc::clone(&clock));
        cache
            .put(&key(), Bytes::from("p"), DataSource::Hot, Duration::from_secs(120))
            .await;

        clock.advance(chrono::Duration::seconds(120));
        assert!(cache.get(&key()).await.is_some(), "ttl boundary is inclusive");

        clock.advance(chrono::Duration::milliseconds(1));
        assert!(cache.get(&key()).await.is_none());
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let cache = memory_backed(Arc::new(ManualClock::new(now())));
        cache
            .put(&key(), Bytes::from("first"), DataSource::Hot, Duration::from_secs(60))
            .await;
        cache
            .put(&key(), Bytes::from("second"), DataSource::Split, Duration::from_secs(60))
            .await;

        let hit = cache.get(&key()).await.expect("entry should be live");
        assert_eq!(hit.payload, Bytes::from("second"));
        assert_eq!(hit.source, DataSource::Split);
    }

    #[tokio::test]
    async fn test_backend_errors_degrade_to_miss() {
        let cache = ResponseCache::new(
            Arc::new(FailingBackend),
            TtlPolicy::default(),
            Arc::new(ManualClock::new(now())),
        );

        cache
            .put(&key(), Bytes::from("p"), DataSource::Hot, Duration::from_secs(60))
            .await;
        assert!(cache.get(&key()).await.is_none());
        cache.invalidate(&key()).await;

        let stats = cache.stats().await;
        assert_eq!(stats.errors, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn test_corrupt_envelope_is_a_miss() {
        let backend: Arc<MemoryCache<QueryKey>> =
            Arc::new(MemoryCache::new(MemoryCacheConfig::new()).unwrap());
        backend
            .put(key(), Bytes::from_static(b"not an envelope"))
            .await
            .unwrap();

        let cache = ResponseCache::new(
            Arc::clone(&backend),
            TtlPolicy::default(),
            Arc::new(ManualClock::new(now())),
        );
        assert!(cache.get(&key()).await.is_none());
        assert_eq!(cache.stats().await.errors, 1);
    }

    #[tokio::test]
    async fn test_ttl_for_uses_clock() {
        let clock = Arc::new(ManualClock::new(now()));
        let cache = memory_backed(Arc::clone(&clock));

        assert_eq!(cache.ttl_for(now() - chrono::Duration::days(1)), cache.policy().long_ttl);
        assert_eq!(cache.ttl_for(now()), cache.policy().short_ttl);
    }

    #[test]
    fn test_header_values() {
        assert_eq!(DataSource::Split.to_string(), "SPLIT");
        assert_eq!(CacheStatus::Bypass.to_string(), "BYPASS");
        assert_eq!(
            serde_json::to_string(&DataSource::Upstream).unwrap(),
            "\"UPSTREAM\""
        );
    }
}
