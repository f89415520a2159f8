//! Router configuration
//!
//! Every collaborator is optional. A router with no hot or cold store only
//! has the upstream passthrough available; a router with no upstream has no
//! fallback.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use vitals_cache::TtlPolicy;

/// Hot store adapter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotConfig {
    /// Base URL of the hot store query API
    pub url: Option<Url>,
    /// Fixed part of the per-query timeout
    pub base_timeout: Duration,
    /// Additional timeout per expected row
    pub per_row_timeout: Duration,
    /// Upper bound for the computed timeout
    pub max_timeout: Duration,
    /// Nominal spacing between samples of one point, for row estimates
    pub sample_interval: Duration,
    /// Row limit sent with each query
    pub row_limit: usize,
}

impl Default for HotConfig {
    fn default() -> Self {
        Self {
            url: None,
            base_timeout: Duration::from_secs(2),
            per_row_timeout: Duration::from_micros(50),
            max_timeout: Duration::from_secs(20),
            sample_interval: Duration::from_secs(60),
            row_limit: 1_000_000,
        }
    }
}

/// Cold store adapter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColdConfig {
    /// Local or mounted directory holding `site/YYYY/MM/DD` partitions
    pub root_dir: Option<PathBuf>,
    /// Object storage base URL holding `site/YYYY/MM/DD.ndjson.gz` objects
    pub url: Option<Url>,
    /// Maximum partition files fetched at once
    pub max_concurrent_files: usize,
    /// Timeout for fetching and decoding one file
    pub per_file_timeout: Duration,
}

impl Default for ColdConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            url: None,
            max_concurrent_files: 8,
            per_file_timeout: Duration::from_secs(10),
        }
    }
}

/// Upstream API passthrough settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream timeseries API
    pub url: Option<Url>,
    /// Bearer token used when the request carries none
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Page size sent when the request does not specify one
    pub default_page_size: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            default_page_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Age of the oldest data the hot store is guaranteed to hold
    pub hot_boundary: Duration,
    /// Overall time budget for one request, across all strategies
    pub request_budget: Duration,
    /// Maximum cached responses
    pub cache_max_entries: usize,
    pub ttl: TtlPolicy,
    pub hot: HotConfig,
    pub cold: ColdConfig,
    pub upstream: UpstreamConfig,
    pub retry: RetryPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            hot_boundary: Duration::from_secs(7 * 24 * 3600),
            request_budget: Duration::from_secs(30),
            cache_max_entries: 10_000,
            ttl: TtlPolicy::default(),
            hot: HotConfig::default(),
            cold: ColdConfig::default(),
            upstream: UpstreamConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RouterConfig {
    /// Whether any store is configured for routed queries.
    pub fn has_stores(&self) -> bool {
        self.hot.url.is_some() || self.cold.root_dir.is_some() || self.cold.url.is_some()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.request_budget.is_zero() {
            return Err("request budget must be greater than 0".to_string());
        }
        if self.hot.max_timeout >= self.request_budget {
            return Err(format!(
                "hot store max timeout {:?} must be below the request budget {:?}",
                self.hot.max_timeout, self.request_budget
            ));
        }
        if self.hot.sample_interval.is_zero() {
            return Err("hot store sample interval must be greater than 0".to_string());
        }
        if self.cold.max_concurrent_files == 0 {
            return Err("cold store concurrency must be greater than 0".to_string());
        }
        if self.cold.root_dir.is_some() && self.cold.url.is_some() {
            return Err("configure either a cold store directory or URL, not both".to_string());
        }
        if self.cache_max_entries == 0 {
            return Err("cache max entries must be greater than 0".to_string());
        }
        self.ttl.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RouterConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.has_stores());
        assert_eq!(config.hot_boundary, Duration::from_secs(604_800));
    }

    #[test]
    fn test_hot_timeout_must_stay_below_budget() {
        let mut config = RouterConfig::default();
        config.hot.max_timeout = config.request_budget;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cold_store_sources_are_exclusive() {
        let mut config = RouterConfig::default();
        config.cold.root_dir = Some(PathBuf::from("/srv/cold"));
        assert!(config.validate().is_ok());
        assert!(config.has_stores());

        config.cold.url = Url::parse("http://cold.local").ok();
        assert!(config.validate().is_err());
    }
}
