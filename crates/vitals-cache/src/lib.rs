//! Response caching for the Building Vitals timeseries router
//!
//! This crate owns everything the query router needs to address, store and
//! expire finished query payloads:
//!
//! - **Cache keys**: deterministic SHA-256 keys derived from
//!   `(site, point set, start, end)`, independent of point ordering
//! - **Path safety**: validation of human-readable storage prefixes that are
//!   joined with cache keys or used to address cold-store partitions
//! - **Backends**: the [`AsyncCache`](traits::AsyncCache) trait and a
//!   `DashMap`-backed [`MemoryCache`](memory_cache::MemoryCache)
//! - **TTL policy**: long TTLs for closed (fully historical) ranges, short
//!   TTLs for ranges that are still accumulating samples
//! - **Response cache**: a best-effort layer that never lets a backend error
//!   reach the caller
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │           Query Router              │
//! └─────────────────────────────────────┘
//!                  │ get / put
//! ┌─────────────────────────────────────┐
//! │          ResponseCache              │
//! │  TtlPolicy · Clock · envelope codec │
//! └─────────────────────────────────────┘
//!                  │
//! ┌─────────────────────────────────────┐
//! │      AsyncCache<QueryKey> backend   │
//! │         (MemoryCache, ...)          │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{TimeZone, Utc};
//! use vitals_cache::{
//!     clock::SystemClock,
//!     config::{MemoryCacheConfig, TtlPolicy},
//!     key::{QueryKey, generate_key},
//!     memory_cache::MemoryCache,
//!     response::ResponseCache,
//! };
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().ok_or("bad date")?;
//! let end = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).single().ok_or("bad date")?;
//! let points = vec!["ahu1.sat".to_string(), "ahu1.rat".to_string()];
//!
//! let key = generate_key("hq", &points, start, end)?;
//! assert_eq!(key.len(), 64);
//!
//! let backend = Arc::new(MemoryCache::<QueryKey>::new(MemoryCacheConfig::new())?);
//! let _cache = ResponseCache::new(backend, TtlPolicy::default(), Arc::new(SystemClock));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod memory_cache;
pub mod response;
pub mod stats;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MemoryCacheConfig, TtlPolicy};
pub use error::{CacheError, CacheResult, KeyError};
pub use key::{
    CacheKey, QueryKey, generate_key, storage_path, validate_path_prefix, validate_path_segment,
};
pub use memory_cache::MemoryCache;
pub use response::{CacheStatus, CachedResponse, DataSource, ResponseCache, ResponseCacheStats};
pub use traits::AsyncCache;
