//! HTTP request handlers for the timeseries and health endpoints.

use crate::server::AppState;
use axum::{
    Json,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use vitals_router::{QueryOutcome, RouterError, TimeseriesRequest};

/// Source that produced the body: `HOT`, `COLD`, `SPLIT`, `CACHE` or `UPSTREAM`
pub const X_DATA_SOURCE: HeaderName = HeaderName::from_static("x-data-source");
/// Server-side processing time in milliseconds
pub const X_PROCESSING_TIME: HeaderName = HeaderName::from_static("x-processing-time");
/// `HIT`, `MISS` or `BYPASS`
pub const X_CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");
/// `HOT_ONLY`, `COLD_ONLY`, `SPLIT` or `PASSTHROUGH`
pub const X_QUERY_STRATEGY: HeaderName = HeaderName::from_static("x-query-strategy");
/// Present and `true` when some cold partitions could not be read
pub const X_PARTIAL_RESULT: HeaderName = HeaderName::from_static("x-partial-result");

/// Query string of `GET /api/timeseries`.
///
/// Every field is optional here so that missing or malformed values are
/// reported through the JSON error body rather than the extractor.
#[derive(Debug, Default, Deserialize)]
pub struct TimeseriesParams {
    /// Site identifier
    pub site: Option<String>,
    /// Comma-separated point names
    pub point_names: Option<String>,
    /// Range start, RFC 3339 or epoch milliseconds
    pub start_time: Option<String>,
    /// Range end, RFC 3339 or epoch milliseconds
    pub end_time: Option<String>,
    /// Upstream page size
    pub page_size: Option<String>,
    /// Upstream pagination cursor
    pub cursor: Option<String>,
    /// `false` forces the upstream passthrough
    pub use_routing: Option<String>,
}

impl TimeseriesParams {
    /// Convert into a router request, taking the bearer token from `headers`.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Validation` for an unparseable `page_size` or
    /// `use_routing` value.
    pub fn into_request(self, headers: &HeaderMap) -> Result<TimeseriesRequest, RouterError> {
        let point_names = self
            .point_names
            .unwrap_or_default()
            .split(',')
            .map(str::to_owned)
            .collect();

        let mut request = TimeseriesRequest::new(
            self.site.unwrap_or_default(),
            point_names,
            self.start_time.unwrap_or_default(),
            self.end_time.unwrap_or_default(),
        );

        request.page_size = self
            .page_size
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|size| *size > 0)
                    .ok_or_else(|| RouterError::Validation(format!("invalid page_size: {s:?}")))
            })
            .transpose()?;
        request.cursor = self.cursor.filter(|c| !c.is_empty());
        request.use_routing = match self.use_routing.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
            Some(v) => {
                return Err(RouterError::Validation(format!("invalid use_routing: {v:?}")));
            }
        };
        request.token = bearer_token(headers);

        Ok(request)
    }
}

/// Bearer credential from the `Authorization` header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_owned())
}

fn outcome_headers(outcome: &QueryOutcome) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        X_DATA_SOURCE,
        HeaderValue::from_static(outcome.source.as_str()),
    );
    headers.insert(
        X_PROCESSING_TIME,
        HeaderValue::from(u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX)),
    );
    headers.insert(
        X_CACHE_STATUS,
        HeaderValue::from_static(outcome.cache_status.as_str()),
    );
    headers.insert(X_QUERY_STRATEGY, HeaderValue::from_static(outcome.strategy));
    if outcome.partial {
        headers.insert(X_PARTIAL_RESULT, HeaderValue::from_static("true"));
    }
    headers
}

/// Handle GET /api/timeseries endpoint.
///
/// # Errors
///
/// Returns `AppError` when the query is invalid or no strategy can serve it.
pub async fn handle_timeseries(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<TimeseriesParams>,
) -> Result<Response, AppError> {
    tracing::debug!(site = ?params.site, "Handling timeseries request");

    let request = params.into_request(&headers)?;
    let outcome = state.router().query(request).await?;

    Ok((StatusCode::OK, outcome_headers(&outcome), outcome.body).into_response())
}

/// Handle GET /health endpoint.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let router = state.router();
    let cache = router.cache_stats().await;

    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "uptime_seconds": state.uptime_seconds(),
        "routing": router.has_routing(),
        "upstream": router.has_upstream(),
        "cache": cache,
    }))
}

/// Application-level error type for HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Query error from validation or the strategy chain
    Router(RouterError),
}

impl AppError {
    /// Status code and client-safe message.
    ///
    /// Only validation messages are passed through; store and upstream
    /// details stay in the logs.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::Router(err) if err.is_validation() => (StatusCode::BAD_REQUEST, err.to_string()),
            Self::Router(err) if err.is_timeout() => (
                StatusCode::GATEWAY_TIMEOUT,
                "Query timed out".to_string(),
            ),
            Self::Router(_) => (
                StatusCode::BAD_GATEWAY,
                "Timeseries data is temporarily unavailable".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        let Self::Router(err) = &self;
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %err, "Timeseries request failed");
        } else {
            tracing::debug!(error = %err, "Rejected timeseries request");
        }

        let body = json!({
            "error": message,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        (status, Json(body)).into_response()
    }
}

impl From<RouterError> for AppError {
    fn from(err: RouterError) -> Self {
        Self::Router(err)
    }
}
