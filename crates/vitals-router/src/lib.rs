//! Hot/cold time-range query routing for building timeseries
//!
//! Recent samples live in a low-latency hot store; older samples are
//! archived to a cold store as day-partitioned NDJSON files. This crate
//! decides which store(s) can answer a query, fetches from them, merges the
//! results and caches finished payloads.
//!
//! # Components
//!
//! - `routing`: `HOT_ONLY` / `COLD_ONLY` / `SPLIT` decision from the hot
//!   boundary age and the current time
//! - `hot`: hot store adapter with a row-scaled timeout and retries
//! - `cold`: cold store adapter with bounded concurrent partition fetches
//!   that tolerates partial failure
//! - `merge`: sorted, de-duplicated merge where hot samples win
//! - `upstream`: passthrough to the upstream timeseries API
//! - `strategy`: the ordered fallback chain run within the request budget
//! - `router`: request validation and the [`QueryRouter`] entry point
//!
//! # Example
//!
//! ```no_run
//! use vitals_router::{QueryRouter, RouterConfig, TimeseriesRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = RouterConfig::default();
//! config.cold.root_dir = Some("/srv/vitals/cold".into());
//!
//! let router = QueryRouter::from_config(config)?;
//! let request = TimeseriesRequest::new(
//!     "hq",
//!     vec!["ahu1.sat".to_string()],
//!     "2024-06-01T00:00:00Z",
//!     "2024-06-02T00:00:00Z",
//! );
//! let outcome = router.query(request).await?;
//! println!("{} bytes from {}", outcome.body.len(), outcome.source);
//! # Ok(())
//! # }
//! ```

pub mod cold;
pub mod config;
pub mod error;
pub mod hot;
pub mod merge;
pub mod model;
pub mod retry;
pub mod router;
pub mod routing;
pub mod strategy;
pub mod transport;
pub mod upstream;

pub use cold::{ColdAdapter, ColdResult, ColdStore, FsColdStore, HttpColdStore};
pub use config::{ColdConfig, HotConfig, RouterConfig, UpstreamConfig};
pub use error::{Result, RouterError};
pub use hot::{HotAdapter, HotResult, HotStore, HotStoreRequest, HttpHotStore};
pub use merge::merge;
pub use model::{Query, Sample, Series, TimeRange};
pub use retry::RetryPolicy;
pub use router::{QueryOutcome, QueryRouter, QueryRouterBuilder, TimeseriesRequest};
pub use routing::{LatencyClass, RoutingDecision, Strategy, route};
pub use strategy::{QueryStrategy, StrategyOutput};
pub use upstream::{UpstreamClient, UpstreamParams};

// Re-exported so callers can build routers without depending on the cache
// crate directly.
pub use vitals_cache::{CacheStatus, DataSource};
