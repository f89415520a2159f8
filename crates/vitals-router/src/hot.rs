//! Hot store adapter
//!
//! Issues one point-filtered range query per request. The timeout grows with
//! the number of rows the query is expected to return, capped below the
//! request budget, and transient failures are retried with backoff.

use crate::{
    config::HotConfig,
    error::{Result, RouterError},
    model::{ParsedRows, Query, Series, TimeRange, format_instant, group_rows, parse_rows},
    retry::RetryPolicy,
    transport::endpoint,
};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// A point-filtered range request against the hot store.
#[derive(Debug, Clone, Serialize)]
pub struct HotStoreRequest {
    pub site: String,
    pub point_names: Vec<String>,
    pub start: String,
    pub end: String,
    pub limit: usize,
}

/// Low-latency store holding recent samples.
#[async_trait]
pub trait HotStore: fmt::Debug + Send + Sync {
    async fn query_rows(&self, request: &HotStoreRequest) -> Result<ParsedRows>;
}

#[derive(Deserialize)]
struct HotStoreResponse {
    #[serde(default)]
    rows: Vec<Value>,
}

/// Hot store reached over its JSON query API.
#[derive(Debug, Clone)]
pub struct HttpHotStore {
    client: Client,
    endpoint: Url,
}

impl HttpHotStore {
    pub fn new(client: Client, base_url: &Url) -> Result<Self> {
        let endpoint = endpoint(base_url, ["query"])?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl HotStore for HttpHotStore {
    async fn query_rows(&self, request: &HotStoreRequest) -> Result<ParsedRows> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(serde_json::to_vec(request)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RouterError::StoreStatus { store: "hot", status });
        }

        let body = response.bytes().await?;
        let parsed: HotStoreResponse = serde_json::from_slice(&body)?;
        Ok(parse_rows(&parsed.rows))
    }
}

/// Result of a hot store query.
#[derive(Debug, Clone)]
pub struct HotResult {
    pub series: Vec<Series>,
    pub row_count: usize,
    pub rejected: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct HotAdapter {
    store: Arc<dyn HotStore>,
    config: HotConfig,
    retry: RetryPolicy,
}

impl HotAdapter {
    pub fn new(store: Arc<dyn HotStore>, config: HotConfig, retry: RetryPolicy) -> Self {
        Self {
            store,
            config,
            retry,
        }
    }

    /// `points × (range_secs / sample_interval + 1)`
    pub fn expected_rows(&self, query: &Query, range: TimeRange) -> u64 {
        let range_secs = u64::try_from(range.duration().num_seconds()).unwrap_or(0);
        let interval_secs = self.config.sample_interval.as_secs().max(1);
        let points = query.point_names().len() as u64;
        points.saturating_mul(range_secs / interval_secs + 1)
    }

    /// Timeout for one attempt: `base + per_row × expected_rows`, capped.
    pub fn timeout_for(&self, query: &Query, range: TimeRange) -> Duration {
        let rows = u128::from(self.expected_rows(query, range));
        let total = self
            .config
            .base_timeout
            .as_nanos()
            .saturating_add(self.config.per_row_timeout.as_nanos().saturating_mul(rows))
            .min(self.config.max_timeout.as_nanos());
        Duration::from_nanos(u64::try_from(total).unwrap_or(u64::MAX))
    }

    pub async fn query(&self, query: &Query, range: TimeRange) -> Result<HotResult> {
        self.run(query, range, None).await
    }

    /// Query the hot store without starting any attempt past `deadline`.
    ///
    /// Each attempt's timeout is also shortened to the time left.
    pub async fn query_until(
        &self,
        query: &Query,
        range: TimeRange,
        deadline: Instant,
    ) -> Result<HotResult> {
        self.run(query, range, Some(deadline)).await
    }

    async fn run(&self, query: &Query, range: TimeRange, deadline: Option<Instant>) -> Result<HotResult> {
        let started = Instant::now();
        let timeout = self.timeout_for(query, range);
        let request = HotStoreRequest {
            site: query.site().to_owned(),
            point_names: query.point_names().to_vec(),
            start: format_instant(range.start()),
            end: format_instant(range.end()),
            limit: self.config.row_limit,
        };

        debug!(
            query = %query.identity(),
            range = %range,
            timeout_ms = timeout.as_millis(),
            "querying hot store"
        );

        let store = &self.store;
        let request = &request;
        let parsed = self
            .retry
            .execute_until(deadline, || async move {
                let attempt_timeout = deadline.map_or(timeout, |deadline| {
                    timeout.min(deadline.saturating_duration_since(Instant::now()))
                });
                match tokio::time::timeout(attempt_timeout, store.query_rows(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(RouterError::Timeout {
                        store: "hot",
                        query: query.identity(),
                    }),
                }
            })
            .await?;

        let row_count = parsed.rows.len();
        let series = group_rows(parsed.rows, query, range);
        let elapsed = started.elapsed();

        debug!(
            query = %query.identity(),
            rows = row_count,
            rejected = parsed.rejected,
            elapsed_ms = elapsed.as_millis(),
            "hot store query complete"
        );

        Ok(HotResult {
            series,
            row_count,
            rejected: parsed.rejected,
            elapsed,
        })
    }
}
