//! Error types for query routing

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    /// The request itself is malformed; retrying or falling back cannot help.
    #[error("Invalid query: {0}")]
    Validation(String),

    #[error("{store} store timed out for {query}")]
    Timeout {
        /// Which store or strategy timed out ("hot", "cold", "request", ...)
        store: &'static str,
        /// Query identity, e.g. `hq [3 points] 2025-01-01T00:00:00.000Z..2025-01-02T00:00:00.000Z`
        query: String,
    },

    #[error("Cold store unavailable: {failed} of {total} partition files failed")]
    ColdStoreUnavailable { failed: usize, total: usize },

    #[error("Store error: {0}")]
    Store(String),

    #[error("{store} store returned HTTP {status}")]
    StoreStatus {
        store: &'static str,
        status: StatusCode,
    },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Upstream returned HTTP {0}")]
    UpstreamStatus(StatusCode),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] vitals_cache::CacheError),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("All query strategies failed: {0}")]
    AllStrategiesFailed(String),
}

impl RouterError {
    /// Check if error is retryable
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Io(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::UpstreamStatus(status) | Self::StoreStatus { status, .. } => {
                matches!(
                    *status,
                    StatusCode::TOO_MANY_REQUESTS
                        | StatusCode::INTERNAL_SERVER_ERROR
                        | StatusCode::BAD_GATEWAY
                        | StatusCode::SERVICE_UNAVAILABLE
                        | StatusCode::GATEWAY_TIMEOUT
                )
            }
            _ => false,
        }
    }

    /// Whether the fallback chain must stop at this error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Whether this error is a timeout of any kind.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

impl From<vitals_cache::KeyError> for RouterError {
    fn from(err: vitals_cache::KeyError) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
