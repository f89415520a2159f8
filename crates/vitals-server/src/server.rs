//! Server state management and orchestration.
//!
//! Holds the query router shared by all HTTP handlers.

use crate::config::ServerConfig;
use crate::error::ServerError;
use std::sync::Arc;
use std::time::SystemTime;
use vitals_router::{QueryRouter, RetryPolicy};

/// Shared application state for HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Query router (built once at startup)
    router: QueryRouter,

    /// Server start time
    started_at: SystemTime,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the router or its store clients cannot be
    /// built.
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        let router_config = config.router_config(RetryPolicy::from_env());
        let router = QueryRouter::from_config(router_config)?;
        Ok(Self::from_router(router))
    }

    /// Wrap an already assembled router.
    #[must_use]
    pub fn from_router(router: QueryRouter) -> Self {
        Self {
            router,
            started_at: SystemTime::now(),
        }
    }

    /// Get reference to the query router.
    #[must_use]
    pub const fn router(&self) -> &QueryRouter {
        &self.router
    }

    /// Get server uptime in seconds.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.started_at)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Server orchestration.
pub struct Server {
    /// Shared application state
    state: Arc<AppState>,
    /// Server configuration
    config: ServerConfig,
}

impl Server {
    /// Create new server with configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the router cannot be built.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let state = AppState::new(&config)?;

        tracing::info!(
            routing = state.router().has_routing(),
            upstream = state.router().has_upstream(),
            "Server initialized"
        );

        Ok(Self {
            state: Arc::new(state),
            config,
        })
    }

    /// Run the HTTP server until interrupted.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the shutdown signal cannot be installed.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Starting Building Vitals query server");
        tracing::info!("HTTP server binding to: {}", self.config.http_bind);

        let http_state = self.state.clone();
        let http_bind = self.config.http_bind;

        let http_server = tokio::spawn(async move {
            if let Err(e) = crate::http::start_server(http_bind, http_state).await {
                tracing::error!("HTTP server failed: {e}");
            }
        });

        tokio::signal::ctrl_c().await.map_err(|e| {
            ServerError::Shutdown(format!("Failed to listen for shutdown signal: {e}"))
        })?;

        tracing::info!("Shutdown signal received, stopping server");
        http_server.abort();

        Ok(())
    }

    /// Get shared application state (for testing).
    #[cfg(test)]
    #[must_use]
    pub const fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_server_creation_with_cold_directory() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            http_bind: "127.0.0.1:0".parse().unwrap(),
            cold_store_dir: Some(dir.path().to_path_buf()),
            ..ServerConfig::default()
        };

        let server = Server::new(config).unwrap();
        assert!(server.state().router().has_routing());
        assert!(!server.state().router().has_upstream());
    }

    #[test]
    fn test_uptime() {
        let router = QueryRouter::builder(vitals_router::RouterConfig::default())
            .build()
            .unwrap();
        let state = AppState::from_router(router);
        assert!(state.uptime_seconds() <= 1);
    }
}
