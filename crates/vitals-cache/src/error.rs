//! Error types for cache operations

use thiserror::Error;

/// Errors raised by cache backends and the response cache codec
#[derive(Debug, Error)]
pub enum CacheError {
    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Cache backend-specific error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Cache is at capacity and cannot store new entries
    #[error("Cache capacity exceeded")]
    CapacityExceeded,
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<base64::DecodeError> for CacheError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Deserialization(err.to_string())
    }
}

/// Errors raised while deriving cache keys or storage paths
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The point set was empty
    #[error("point set must not be empty")]
    EmptyPointSet,

    /// The site identifier was empty or blank
    #[error("site identifier must not be empty")]
    EmptySite,

    /// `start` was after `end`
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange {
        /// RFC 3339 start instant
        start: String,
        /// RFC 3339 end instant
        end: String,
    },

    /// A storage path or prefix failed validation
    #[error("unsafe storage path '{path}': {reason}")]
    UnsafePath {
        /// The offending path
        path: String,
        /// Why it was rejected
        reason: &'static str,
    },
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
