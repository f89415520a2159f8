//! Shared HTTP transport for store and upstream clients
//!
//! reqwest is built without a bundled rustls crypto provider, so the ring
//! provider is installed process-wide before the first client is built.

use crate::error::{Result, RouterError};
use reqwest::{Client, ClientBuilder};
use url::Url;
use std::sync::OnceLock;
use std::time::Duration;

static CRYPTO_PROVIDER: OnceLock<()> = OnceLock::new();

/// Install the ring crypto provider for rustls, once per process.
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.get_or_init(|| {
        // Err means another component already installed one
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Connection settings shared by every outbound client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Overall per-request ceiling; adapters apply tighter timeouts
    pub request_timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            user_agent: concat!("vitals-router/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Build a pooled HTTP client.
pub fn build_client(config: &TransportConfig) -> Result<Client> {
    ensure_crypto_provider();

    ClientBuilder::new()
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(16)
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .tcp_nodelay(true)
        .tcp_keepalive(Duration::from_secs(60))
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .redirect(reqwest::redirect::Policy::limited(3))
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(Into::into)
}

/// Append path segments to a base URL, percent-encoding each one.
pub fn endpoint<I, S>(base: &Url, segments: I) -> Result<Url>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| RouterError::Store(format!("URL cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
