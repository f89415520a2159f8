//! Integration tests for the timeseries HTTP endpoint.
//!
//! These tests start a real HTTP server and make actual requests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use axum::http::StatusCode;
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;
use vitals_router::{FsColdStore, QueryRouter, RetryPolicy, RouterConfig};
use vitals_server::AppState;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

/// Cold archive with one partition 30 days back.
fn create_cold_archive() -> (TempDir, chrono::DateTime<Utc>) {
    let dir = TempDir::new().expect("Failed to create temporary cold store");
    let day = Utc::now() - Duration::days(30);
    let partition = dir.path().join("hq").join(day.format("%Y/%m").to_string());
    std::fs::create_dir_all(&partition).unwrap();

    let noon = day.date_naive().and_hms_opt(12, 0, 0).unwrap().and_utc();
    let rows = [
        json!({"point_name": "ahu1.sat", "timestamp": noon.to_rfc3339(), "value": 55.5}),
        json!({"point_name": "ahu1.rat", "timestamp": noon.to_rfc3339(), "value": 71.0}),
    ];
    let body: String = rows.iter().map(|r| format!("{r}\n")).collect();
    std::fs::write(partition.join(day.format("%d.ndjson").to_string()), body).unwrap();

    (dir, noon)
}

/// Start test HTTP server on random port.
async fn start_test_server(config: RouterConfig, cold_root: Option<&TempDir>) -> SocketAddr {
    // Install ring crypto provider for reqwest (idempotent)
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut builder = QueryRouter::builder(config);
    if let Some(root) = cold_root {
        builder = builder.cold_store(Arc::new(FsColdStore::new(root.path())));
    }
    let state = Arc::new(AppState::from_router(builder.build().expect("Failed to build router")));
    let app = vitals_server::http::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind HTTP listener");
    let addr = listener
        .local_addr()
        .expect("Failed to get listener address");

    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("HTTP server failed during test execution");
    });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    addr
}

fn router_config() -> RouterConfig {
    RouterConfig {
        retry: RetryPolicy::none(),
        ..RouterConfig::default()
    }
}

fn iso(instant: chrono::DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn header_str<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_cold_query_then_cache_hit() {
    let (cold, noon) = create_cold_archive();
    let addr = start_test_server(router_config(), Some(&cold)).await;
    let client = reqwest::Client::new();

    let url = format!("http://{addr}/api/timeseries");
    let query = [
        ("site", "hq".to_string()),
        ("point_names", "ahu1.sat".to_string()),
        ("start_time", iso(noon - Duration::hours(1))),
        ("end_time", iso(noon + Duration::hours(1))),
    ];
    let mut request_url = Url::parse(&url).unwrap();
    request_url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));

    let first = client.get(request_url.clone()).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header_str(&first, "x-data-source"), Some("COLD"));
    assert_eq!(header_str(&first, "x-cache-status"), Some("MISS"));
    assert_eq!(header_str(&first, "x-query-strategy"), Some("COLD_ONLY"));
    assert!(header_str(&first, "x-processing-time").is_some());
    assert!(header_str(&first, "x-partial-result").is_none());
    let first_body = first.bytes().await.unwrap();

    let body: Value = serde_json::from_slice(&first_body).unwrap();
    assert_eq!(body["point_samples"].as_array().unwrap().len(), 1);
    assert_eq!(body["point_samples"][0]["name"], json!("ahu1.sat"));
    assert_eq!(body["point_samples"][0]["samples"][0]["value"], json!(55.5));

    let second = client.get(request_url).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header_str(&second, "x-data-source"), Some("CACHE"));
    assert_eq!(header_str(&second, "x-cache-status"), Some("HIT"));
    assert_eq!(header_str(&second, "x-query-strategy"), Some("COLD_ONLY"));
    assert_eq!(second.bytes().await.unwrap(), first_body);
}

#[tokio::test]
async fn test_validation_errors_return_400_json() {
    let (cold, _) = create_cold_archive();
    let addr = start_test_server(router_config(), Some(&cold)).await;
    let client = reqwest::Client::new();

    for query in [
        "site=hq&point_names=a&start_time=2025-01-02T00:00:00Z&end_time=2025-01-01T00:00:00Z",
        "site=hq&start_time=2025-01-01T00:00:00Z&end_time=2025-01-02T00:00:00Z",
        "site=..&point_names=a&start_time=2025-01-01T00:00:00Z&end_time=2025-01-02T00:00:00Z",
        "site=hq&point_names=a&start_time=soon&end_time=2025-01-02T00:00:00Z",
        "site=hq&point_names=a&start_time=2025-01-01T00:00:00Z&end_time=2025-01-02T00:00:00Z&page_size=x",
    ] {
        let response = client
            .get(format!("http://{addr}/api/timeseries?{query}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{query}");

        let body: Value = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
        assert!(body["error"].is_string());
        assert!(body["timestamp"].is_string());
    }
}

#[tokio::test]
async fn test_passthrough_forwards_bearer_token() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sites/hq/timeseries/paginated"))
        .and(header("authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "point_samples": [{"name": "a", "samples": []}],
            "next_cursor": null
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let (cold, _) = create_cold_archive();
    let mut config = router_config();
    config.upstream.url = Url::parse(&upstream.uri()).ok();
    let addr = start_test_server(config, Some(&cold)).await;

    let response = reqwest::Client::new()
        .get(format!(
            "http://{addr}/api/timeseries?site=hq&point_names=a&start_time=2025-01-01T00:00:00Z&end_time=2025-01-02T00:00:00Z&use_routing=false"
        ))
        .header("Authorization", "Bearer user-token")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-data-source"), Some("UPSTREAM"));
    assert_eq!(header_str(&response, "x-cache-status"), Some("BYPASS"));
    assert_eq!(header_str(&response, "x-query-strategy"), Some("PASSTHROUGH"));
}

#[tokio::test]
async fn test_unavailable_sources_return_502_without_details() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("db password is hunter2"))
        .mount(&upstream)
        .await;

    let mut config = router_config();
    config.upstream.url = Url::parse(&upstream.uri()).ok();
    let addr = start_test_server(config, None).await;

    let response = reqwest::Client::new()
        .get(format!(
            "http://{addr}/api/timeseries?site=hq&point_names=a&start_time=2025-01-01T00:00:00Z&end_time=2025-01-02T00:00:00Z"
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = response.text().await.unwrap();
    assert!(!body.contains("hunter2"));
    assert!(!body.contains("127.0.0.1"));
}

#[tokio::test]
async fn test_health_endpoint() {
    let addr = start_test_server(router_config(), None).await;

    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["service"], json!("vitals-server"));
    assert!(body["version"].is_string());
    assert!(body["timestamp"].is_string());
    assert_eq!(body["cache"]["hits"], json!(0));
}
