//! Error types for the timeseries server.

use thiserror::Error;
use vitals_router::RouterError;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of range or inconsistent with another
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Missing required configuration value
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Server runtime errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind HTTP server
    #[error("Failed to bind HTTP server to {addr}: {source}")]
    HttpBindFailed {
        /// Address that failed to bind
        addr: std::net::SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Query router could not be built
    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    /// Server shutdown error
    #[error("Server shutdown error: {0}")]
    Shutdown(String),
}
