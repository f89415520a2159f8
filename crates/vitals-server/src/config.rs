//! Server configuration management.
//!
//! Configuration comes from CLI arguments with environment variable
//! fallbacks (`VITALS_*`), then defaults. Retry tuning is read from the
//! environment only, see [`RetryPolicy::from_env`].
//!
//! # Example
//!
//! ```no_run
//! use vitals_server::ServerConfig;
//!
//! let config = ServerConfig::from_args();
//! config.validate().expect("Invalid configuration");
//!
//! println!("HTTP server will bind to: {}", config.http_bind);
//! ```

use crate::error::ConfigError;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use vitals_cache::TtlPolicy;
use vitals_router::{RetryPolicy, RouterConfig};

const SECONDS_PER_DAY: u64 = 24 * 3600;

/// Server configuration loaded from CLI args and environment variables.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "vitals-server",
    about = "Hot/cold routing front end for building timeseries queries",
    version
)]
pub struct ServerConfig {
    /// HTTP bind address
    #[arg(long, env = "VITALS_HTTP_BIND", default_value = "0.0.0.0:8080")]
    pub http_bind: SocketAddr,

    /// Hot store query API base URL
    #[arg(long, env = "VITALS_HOT_STORE_URL")]
    pub hot_store_url: Option<Url>,

    /// Directory holding cold `site/YYYY/MM/DD` partitions
    #[arg(long, env = "VITALS_COLD_STORE_DIR", conflicts_with = "cold_store_url")]
    pub cold_store_dir: Option<PathBuf>,

    /// Object storage base URL holding cold partitions
    #[arg(long, env = "VITALS_COLD_STORE_URL")]
    pub cold_store_url: Option<Url>,

    /// Upstream timeseries API base URL
    #[arg(long, env = "VITALS_UPSTREAM_URL")]
    pub upstream_url: Option<Url>,

    /// Bearer token for the upstream API when the caller sends none
    #[arg(long, env = "VITALS_UPSTREAM_TOKEN", hide_env_values = true)]
    pub upstream_token: Option<String>,

    /// Age in days of the oldest data the hot store holds
    #[arg(long, env = "VITALS_HOT_BOUNDARY_DAYS", default_value_t = 7)]
    pub hot_boundary_days: u64,

    /// Maximum cached responses
    #[arg(long, env = "VITALS_CACHE_MAX_ENTRIES", default_value_t = 10_000)]
    pub cache_max_entries: usize,

    /// Cache TTL in seconds for closed ranges
    #[arg(long, env = "VITALS_CACHE_LONG_TTL", default_value_t = 21_600)]
    pub cache_long_ttl: u64,

    /// Cache TTL in seconds for ranges ending near now
    #[arg(long, env = "VITALS_CACHE_SHORT_TTL", default_value_t = 120)]
    pub cache_short_ttl: u64,

    /// Seconds before now a range must end to count as closed
    #[arg(long, env = "VITALS_CACHE_GRACE", default_value_t = 3600)]
    pub cache_grace: u64,

    /// Cold partition files fetched concurrently
    #[arg(long, env = "VITALS_COLD_CONCURRENCY", default_value_t = 8)]
    pub cold_concurrency: usize,

    /// Overall request budget in seconds
    #[arg(long, env = "VITALS_REQUEST_BUDGET", default_value_t = 30)]
    pub request_budget: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            hot_store_url: None,
            cold_store_dir: None,
            cold_store_url: None,
            upstream_url: None,
            upstream_token: None,
            hot_boundary_days: 7,
            cache_max_entries: 10_000,
            cache_long_ttl: 21_600,
            cache_short_ttl: 120,
            cache_grace: 3600,
            cold_concurrency: 8,
            request_budget: 30,
        }
    }
}

impl ServerConfig {
    /// Parse configuration from command-line arguments.
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Whether any hot or cold store is configured.
    pub fn has_stores(&self) -> bool {
        self.hot_store_url.is_some() || self.cold_store_dir.is_some() || self.cold_store_url.is_some()
    }

    /// Router configuration for these settings, with the given retry policy.
    pub fn router_config(&self, retry: RetryPolicy) -> RouterConfig {
        let mut config = RouterConfig {
            hot_boundary: Duration::from_secs(self.hot_boundary_days.saturating_mul(SECONDS_PER_DAY)),
            request_budget: Duration::from_secs(self.request_budget),
            cache_max_entries: self.cache_max_entries,
            ttl: TtlPolicy::new()
                .with_long_ttl(Duration::from_secs(self.cache_long_ttl))
                .with_short_ttl(Duration::from_secs(self.cache_short_ttl))
                .with_grace(Duration::from_secs(self.cache_grace)),
            retry,
            ..RouterConfig::default()
        };

        config.hot.url.clone_from(&self.hot_store_url);
        // Keep the hot store timeout inside the request budget
        config.hot.max_timeout = config
            .hot
            .max_timeout
            .min(config.request_budget * 2 / 3);
        config.cold.root_dir.clone_from(&self.cold_store_dir);
        config.cold.url.clone_from(&self.cold_store_url);
        config.cold.max_concurrent_files = self.cold_concurrency;
        config.upstream.url.clone_from(&self.upstream_url);
        config.upstream.token.clone_from(&self.upstream_token);
        config
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - No hot store, cold store or upstream is configured
    /// - The cold store directory does not exist
    /// - Any numeric setting is out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.has_stores() && self.upstream_url.is_none() {
            return Err(ConfigError::MissingRequired(
                "a hot store, cold store or upstream URL".to_string(),
            ));
        }

        if let Some(dir) = &self.cold_store_dir
            && !dir.is_dir()
        {
            return Err(ConfigError::Invalid(format!(
                "cold store directory not found: {}",
                dir.display()
            )));
        }

        if self.hot_boundary_days == 0 {
            return Err(ConfigError::Invalid(
                "hot boundary must be at least one day".to_string(),
            ));
        }

        self.router_config(RetryPolicy::default())
            .validate()
            .map_err(ConfigError::Invalid)
    }
}
