//! Building Vitals query server binary entry point.
//!
//! Parses configuration, initializes logging and runs the server until
//! interrupted. Set `VITALS_LOG_FORMAT=json` for JSON log lines.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use vitals_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("VITALS_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ServerConfig::from_args();

    tracing::info!(
        http = %config.http_bind,
        hot = config.hot_store_url.is_some(),
        cold_dir = ?config.cold_store_dir,
        cold_url = config.cold_store_url.is_some(),
        upstream = config.upstream_url.is_some(),
        "Configuration loaded"
    );

    config.validate().context("invalid configuration")?;

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
