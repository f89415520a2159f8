//! Upstream timeseries API passthrough
//!
//! Used when routing is disabled or when the routed strategy fails. The
//! upstream response is returned as-is except that `point_samples` entries
//! for points the caller did not ask for are removed.

use crate::{
    config::UpstreamConfig,
    error::{Result, RouterError},
    model::{Query, format_instant, row_point_name},
    retry::RetryPolicy,
    transport::endpoint,
};
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;
use std::time::Instant;
use tracing::debug;
use url::Url;

/// Request-scoped upstream parameters beyond the query itself.
#[derive(Debug, Clone, Default)]
pub struct UpstreamParams {
    pub page_size: Option<u32>,
    pub cursor: Option<String>,
    /// Bearer token from the incoming request, forwarded unmodified
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
    default_page_size: u32,
    retry: RetryPolicy,
}

impl UpstreamClient {
    /// Returns `None` when no upstream URL is configured.
    pub fn from_config(client: Client, config: &UpstreamConfig, retry: RetryPolicy) -> Option<Self> {
        let base_url = config.url.clone()?;
        Some(Self {
            client,
            base_url,
            token: config.token.clone(),
            default_page_size: config.default_page_size,
            retry,
        })
    }

    /// Paginated endpoint URL for a query.
    pub fn request_url(&self, query: &Query, params: &UpstreamParams) -> Result<Url> {
        let mut url = endpoint(
            &self.base_url,
            ["sites", query.site(), "timeseries", "paginated"],
        )?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("start_time", &format_instant(query.start()))
                .append_pair("end_time", &format_instant(query.end()))
                .append_pair(
                    "page_size",
                    &params.page_size.unwrap_or(self.default_page_size).to_string(),
                )
                .append_pair("raw_data", "true");
            if let Some(cursor) = &params.cursor {
                pairs.append_pair("cursor", cursor);
            }
        }
        Ok(url)
    }

    pub async fn fetch(&self, query: &Query, params: &UpstreamParams) -> Result<Bytes> {
        let started = Instant::now();
        let url = self.request_url(query, params)?;
        let token = params.token.as_deref().or(self.token.as_deref());

        debug!(query = %query.identity(), "forwarding query upstream");

        let url = &url;
        let body = self
            .retry
            .execute(|| async move {
                let mut request = self.client.get(url.clone()).header(ACCEPT, "application/json");
                if let Some(token) = token {
                    request = request.header(AUTHORIZATION, format!("Bearer {token}"));
                }
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(RouterError::UpstreamStatus(status));
                }
                Ok(response.bytes().await?)
            })
            .await?;

        let filtered = filter_point_samples(body, query);
        debug!(
            query = %query.identity(),
            bytes = filtered.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "upstream query complete"
        );
        Ok(filtered)
    }
}

/// Drop `point_samples` entries for points not in the query.
///
/// Bodies that are not a JSON object with a `point_samples` array, or where
/// nothing needs removing, are returned byte-for-byte.
pub fn filter_point_samples(body: Bytes, query: &Query) -> Bytes {
    let Ok(mut document) = serde_json::from_slice::<Value>(&body) else {
        return body;
    };
    let Some(samples) = document
        .get_mut("point_samples")
        .and_then(Value::as_array_mut)
    else {
        return body;
    };

    let before = samples.len();
    samples.retain(|entry| row_point_name(entry).is_some_and(|name| query.wants(name)));
    if samples.len() == before {
        return body;
    }

    match serde_json::to_vec(&document) {
        Ok(filtered) => Bytes::from(filtered),
        Err(_) => body,
    }
}
