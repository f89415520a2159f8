//! Query router
//!
//! Validates an incoming request, assembles the strategy chain for it and
//! runs the chain within the request budget.

use crate::{
    cold::{ColdAdapter, ColdStore, FsColdStore, HttpColdStore},
    config::RouterConfig,
    error::{Result, RouterError},
    hot::{HotAdapter, HotStore, HttpHotStore},
    model::{Query, parse_instant},
    strategy::{QueryContext, QueryStrategy, RoutedStrategy, UpstreamStrategy, run_chain},
    transport::{TransportConfig, build_client},
    upstream::{UpstreamClient, UpstreamParams},
};
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use vitals_cache::{
    CacheStatus, Clock, DataSource, MemoryCache, MemoryCacheConfig, QueryKey, ResponseCache,
    ResponseCacheStats, SystemClock,
};

/// A timeseries request as received, before validation.
#[derive(Debug, Clone)]
pub struct TimeseriesRequest {
    pub site: String,
    pub point_names: Vec<String>,
    pub start_time: String,
    pub end_time: String,
    pub page_size: Option<u32>,
    pub cursor: Option<String>,
    pub use_routing: bool,
    /// Bearer token presented by the caller
    pub token: Option<String>,
}

impl TimeseriesRequest {
    pub fn new(
        site: impl Into<String>,
        point_names: Vec<String>,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Self {
        Self {
            site: site.into(),
            point_names,
            start_time: start_time.into(),
            end_time: end_time.into(),
            page_size: None,
            cursor: None,
            use_routing: true,
            token: None,
        }
    }

    /// Parse the time bounds and normalize into a `Query`.
    pub fn to_query(&self) -> Result<Query> {
        let start = parse_instant(&self.start_time).ok_or_else(|| {
            RouterError::Validation(format!("invalid start_time: {:?}", self.start_time))
        })?;
        let end = parse_instant(&self.end_time).ok_or_else(|| {
            RouterError::Validation(format!("invalid end_time: {:?}", self.end_time))
        })?;
        Query::new(&self.site, &self.point_names, start, end)
    }
}

/// A served response and how it was produced.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub body: Bytes,
    pub source: DataSource,
    pub cache_status: CacheStatus,
    pub strategy: &'static str,
    pub partial: bool,
    pub elapsed: Duration,
}

/// Entry point for timeseries queries.
#[derive(Debug, Clone)]
pub struct QueryRouter {
    routed: Option<RoutedStrategy>,
    upstream: Option<UpstreamStrategy>,
    cache: Arc<ResponseCache>,
    request_budget: Duration,
}

impl QueryRouter {
    /// Build a router and its store clients from configuration.
    pub fn from_config(config: RouterConfig) -> Result<Self> {
        let client = build_client(&TransportConfig::default())?;
        let mut builder = QueryRouterBuilder::new(config.clone());

        if let Some(url) = &config.hot.url {
            builder = builder.hot_store(Arc::new(HttpHotStore::new(client.clone(), url)?));
        }
        if let Some(root) = &config.cold.root_dir {
            builder = builder.cold_store(Arc::new(FsColdStore::new(root.clone())));
        } else if let Some(url) = &config.cold.url {
            builder = builder.cold_store(Arc::new(HttpColdStore::new(client.clone(), url.clone())));
        }

        builder.http_client(client).build()
    }

    pub fn builder(config: RouterConfig) -> QueryRouterBuilder {
        QueryRouterBuilder::new(config)
    }

    /// Strategies to try for this request, in order.
    fn chain(&self, use_routing: bool) -> Vec<Box<dyn QueryStrategy>> {
        let mut chain: Vec<Box<dyn QueryStrategy>> = Vec::with_capacity(2);
        if use_routing && let Some(routed) = &self.routed {
            chain.push(Box::new(routed.clone()));
        }
        if let Some(upstream) = &self.upstream {
            chain.push(Box::new(upstream.clone()));
        }
        chain
    }

    pub async fn query(&self, request: TimeseriesRequest) -> Result<QueryOutcome> {
        let started = Instant::now();
        let query = request.to_query()?;
        let chain = self.chain(request.use_routing);

        debug!(
            query = %query.identity(),
            use_routing = request.use_routing,
            strategies = chain.len(),
            "handling timeseries query"
        );

        let context = QueryContext {
            query,
            upstream: UpstreamParams {
                page_size: request.page_size,
                cursor: request.cursor,
                token: request.token,
            },
        };

        let output = run_chain(&chain, &context, self.request_budget).await?;
        let elapsed = started.elapsed();

        info!(
            query = %context.query.identity(),
            source = %output.source,
            cache = %output.cache_status,
            strategy = output.strategy,
            partial = output.partial,
            elapsed_ms = elapsed.as_millis(),
            "timeseries query served"
        );

        Ok(QueryOutcome {
            body: output.body,
            source: output.source,
            cache_status: output.cache_status,
            strategy: output.strategy,
            partial: output.partial,
            elapsed,
        })
    }

    pub fn has_routing(&self) -> bool {
        self.routed.is_some()
    }

    pub fn has_upstream(&self) -> bool {
        self.upstream.is_some()
    }

    pub async fn cache_stats(&self) -> ResponseCacheStats {
        self.cache.stats().await
    }
}

/// Assembles a router from configuration plus store implementations.
#[derive(Debug)]
pub struct QueryRouterBuilder {
    config: RouterConfig,
    hot: Option<Arc<dyn HotStore>>,
    cold: Option<Arc<dyn ColdStore>>,
    client: Option<Client>,
    clock: Arc<dyn Clock>,
}

impl QueryRouterBuilder {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            hot: None,
            cold: None,
            client: None,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn hot_store(mut self, store: Arc<dyn HotStore>) -> Self {
        self.hot = Some(store);
        self
    }

    #[must_use]
    pub fn cold_store(mut self, store: Arc<dyn ColdStore>) -> Self {
        self.cold = Some(store);
        self
    }

    /// Client used for the upstream API.
    #[must_use]
    pub fn http_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<QueryRouter> {
        let config = self.config;
        config.validate().map_err(RouterError::Validation)?;

        let cache_config = MemoryCacheConfig::new()
            .with_max_entries(config.cache_max_entries)
            .with_default_ttl(config.ttl.long_ttl);
        let backend = Arc::new(MemoryCache::<QueryKey>::new(cache_config)?);
        let cache = Arc::new(ResponseCache::new(backend, config.ttl, Arc::clone(&self.clock)));

        let hot = self
            .hot
            .map(|store| Arc::new(HotAdapter::new(store, config.hot.clone(), config.retry.clone())));
        let cold = self
            .cold
            .map(|store| Arc::new(ColdAdapter::new(store, config.cold.clone())));

        let routed = (hot.is_some() || cold.is_some()).then(|| RoutedStrategy {
            hot,
            cold,
            cache: Arc::clone(&cache),
            hot_boundary: config.hot_boundary,
            clock: Arc::clone(&self.clock),
        });

        let upstream = match (&config.upstream.url, self.client) {
            (Some(_), Some(client)) => Some(client),
            (Some(_), None) => Some(build_client(&TransportConfig::default())?),
            (None, _) => None,
        }
        .and_then(|client| UpstreamClient::from_config(client, &config.upstream, config.retry.clone()))
        .map(|client| UpstreamStrategy {
            client: Arc::new(client),
        });

        info!(
            hot = routed.as_ref().is_some_and(|r| r.hot.is_some()),
            cold = routed.as_ref().is_some_and(|r| r.cold.is_some()),
            upstream = upstream.is_some(),
            hot_boundary_secs = config.hot_boundary.as_secs(),
            "query router ready"
        );

        Ok(QueryRouter {
            routed,
            upstream,
            cache,
            request_budget: config.request_budget,
        })
    }
}
