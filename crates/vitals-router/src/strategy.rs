//! Query strategies and the fallback chain
//!
//! A request is served by the first strategy in the chain that succeeds.
//! The routed strategy answers from the response cache or the hot and cold
//! stores; the upstream strategy forwards to the upstream API.

use crate::{
    cold::ColdAdapter,
    error::{Result, RouterError},
    hot::HotAdapter,
    merge::merge,
    model::{Query, render_payload},
    routing::{Strategy, route},
    upstream::{UpstreamClient, UpstreamParams},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use vitals_cache::{CacheStatus, Clock, DataSource, ResponseCache};

/// Header label for passthrough responses.
pub const PASSTHROUGH: &str = "PASSTHROUGH";

/// Everything a strategy needs to answer one request.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query: Query,
    pub upstream: UpstreamParams,
}

/// What a strategy produced.
#[derive(Debug, Clone)]
pub struct StrategyOutput {
    pub body: Bytes,
    pub source: DataSource,
    pub cache_status: CacheStatus,
    /// `HOT_ONLY`, `COLD_ONLY`, `SPLIT` or `PASSTHROUGH`
    pub strategy: &'static str,
    /// Some cold partitions could not be read
    pub partial: bool,
}

#[async_trait]
pub trait QueryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce a response, giving up on store work past `deadline`.
    async fn execute(&self, context: &QueryContext, deadline: Instant) -> Result<StrategyOutput>;
}

/// Strategy label recorded for a payload produced by `source`.
pub fn strategy_label(source: DataSource) -> &'static str {
    match source {
        DataSource::Hot => Strategy::HotOnly.as_str(),
        DataSource::Cold => Strategy::ColdOnly.as_str(),
        DataSource::Split => Strategy::Split.as_str(),
        DataSource::Cache | DataSource::Upstream => PASSTHROUGH,
    }
}

/// Cache, then hot and/or cold stores by routing decision.
#[derive(Debug, Clone)]
pub struct RoutedStrategy {
    pub(crate) hot: Option<Arc<HotAdapter>>,
    pub(crate) cold: Option<Arc<ColdAdapter>>,
    pub(crate) cache: Arc<ResponseCache>,
    pub(crate) hot_boundary: Duration,
    pub(crate) clock: Arc<dyn Clock>,
}

impl RoutedStrategy {
    fn hot(&self) -> Result<&HotAdapter> {
        self.hot
            .as_deref()
            .ok_or_else(|| RouterError::Store("hot store is not configured".to_string()))
    }

    fn cold(&self) -> Result<&ColdAdapter> {
        self.cold
            .as_deref()
            .ok_or_else(|| RouterError::Store("cold store is not configured".to_string()))
    }
}

#[async_trait]
impl QueryStrategy for RoutedStrategy {
    fn name(&self) -> &'static str {
        "routed"
    }

    async fn execute(&self, context: &QueryContext, deadline: Instant) -> Result<StrategyOutput> {
        let query = &context.query;
        let key = query.cache_key()?;

        if let Some(cached) = self.cache.get(&key).await {
            debug!(query = %query.identity(), source = %cached.source, "serving from response cache");
            return Ok(StrategyOutput {
                body: cached.payload,
                source: DataSource::Cache,
                cache_status: CacheStatus::Hit,
                strategy: strategy_label(cached.source),
                partial: false,
            });
        }

        let range = query.range();
        let decision = route(range, self.hot_boundary, self.clock.as_ref());
        debug!(
            query = %query.identity(),
            strategy = decision.strategy.as_str(),
            latency = ?decision.latency,
            "routing decision"
        );

        let (series, source, partial) = match decision.strategy {
            Strategy::HotOnly => {
                let hot = self.hot()?.query_until(query, range, deadline).await?;
                (merge(Some(hot.series.as_slice()), None, range), DataSource::Hot, false)
            }
            Strategy::ColdOnly => {
                let cold = self.cold()?.query_until(query, range, deadline).await?;
                let partial = cold.is_partial();
                (merge(None, Some(cold.series.as_slice()), range), DataSource::Cold, partial)
            }
            Strategy::Split => {
                let (hot_adapter, cold_adapter) = (self.hot()?, self.cold()?);
                let hot_range = decision.hot_range(range).unwrap_or(range);
                let cold_range = decision.cold_range(range).unwrap_or(range);
                let (hot, cold) = tokio::try_join!(
                    hot_adapter.query_until(query, hot_range, deadline),
                    cold_adapter.query_until(query, cold_range, deadline),
                )?;
                let partial = cold.is_partial();
                (
                    merge(Some(hot.series.as_slice()), Some(cold.series.as_slice()), range),
                    DataSource::Split,
                    partial,
                )
            }
        };

        let body = render_payload(&series, partial)?;

        if partial {
            warn!(query = %query.identity(), "returning partial result, not caching");
        } else {
            let ttl = self.cache.ttl_for(range.end());
            self.cache.put(&key, body.clone(), source, ttl).await;
        }

        Ok(StrategyOutput {
            body,
            source,
            cache_status: CacheStatus::Miss,
            strategy: decision.strategy.as_str(),
            partial,
        })
    }
}

/// Forward to the upstream API.
#[derive(Debug, Clone)]
pub struct UpstreamStrategy {
    pub(crate) client: Arc<UpstreamClient>,
}

#[async_trait]
impl QueryStrategy for UpstreamStrategy {
    fn name(&self) -> &'static str {
        "upstream"
    }

    async fn execute(&self, context: &QueryContext, _deadline: Instant) -> Result<StrategyOutput> {
        let body = self.client.fetch(&context.query, &context.upstream).await?;
        Ok(StrategyOutput {
            body,
            source: DataSource::Upstream,
            cache_status: CacheStatus::Bypass,
            strategy: PASSTHROUGH,
            partial: false,
        })
    }
}

/// Run strategies in order within a shared budget.
///
/// A strategy followed by others gets at most two thirds of what remains,
/// so a fallback always has time to run; the last strategy gets everything
/// left. A validation error ends the chain immediately; any other error
/// moves on to the next strategy. When every strategy fails the last error
/// is returned.
pub async fn run_chain(
    strategies: &[Box<dyn QueryStrategy>],
    context: &QueryContext,
    budget: Duration,
) -> Result<StrategyOutput> {
    let deadline = Instant::now() + budget;
    let mut last_error = None;

    for (position, strategy) in strategies.iter().enumerate() {
        let now = Instant::now();
        let remaining = deadline.saturating_duration_since(now);
        if remaining.is_zero() {
            last_error = Some(RouterError::Timeout {
                store: "request",
                query: context.query.identity(),
            });
            break;
        }

        let slice = if position + 1 < strategies.len() {
            remaining * 2 / 3
        } else {
            remaining
        };

        let result = tokio::time::timeout(slice, strategy.execute(context, now + slice))
            .await
            .unwrap_or_else(|_| {
                Err(RouterError::Timeout {
                    store: strategy.name(),
                    query: context.query.identity(),
                })
            });

        match result {
            Ok(output) => return Ok(output),
            Err(e) if e.is_validation() => return Err(e),
            Err(e) => {
                warn!(
                    strategy = strategy.name(),
                    query = %context.query.identity(),
                    error = %e,
                    "query strategy failed, trying next"
                );
                last_error = Some(e);
            }
        }
    }

    let err = last_error.unwrap_or_else(|| {
        RouterError::AllStrategiesFailed("no query strategy is available".to_string())
    });
    error!(query = %context.query.identity(), error = %err, "all query strategies failed");
    Err(err)
}
