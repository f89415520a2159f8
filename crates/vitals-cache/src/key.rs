//! Cache keys for timeseries query results
//!
//! A query is identified by `(site, point set, start, end)`. The key is the
//! lowercase hex SHA-256 of a canonical JSON rendering of that tuple, so two
//! requests for the same points in a different order share one cache entry.
//!
//! Storage prefixes (cache namespaces, cold-store partitions) are
//! human-readable and validated separately from the hash before they are
//! joined with anything.

use crate::error::KeyError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

/// Common interface for cache key types.
pub trait CacheKey: fmt::Debug + Clone + PartialEq + Eq + std::hash::Hash + Send + Sync {
    /// String form used as the storage key.
    fn as_cache_key(&self) -> &str;
}

#[derive(Serialize)]
struct CanonicalQuery<'a> {
    site: &'a str,
    points: &'a [String],
    start: String,
    end: String,
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Key for a finished query payload.
#[derive(Debug, Clone)]
pub struct QueryKey {
    site: String,
    points: Vec<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cached_key: OnceLock<String>,
}

// The digest cache is excluded from equality and hashing
impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.site == other.site
            && self.points == other.points
            && self.start == other.start
            && self.end == other.end
    }
}

impl Eq for QueryKey {}

impl std::hash::Hash for QueryKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.site.hash(state);
        self.points.hash(state);
        self.start.hash(state);
        self.end.hash(state);
    }
}

impl QueryKey {
    /// Build a key, normalizing the point set.
    ///
    /// Point names are sorted and de-duplicated. The site is trimmed.
    pub fn new<S: AsRef<str>>(
        site: &str,
        point_names: &[S],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, KeyError> {
        let site = site.trim();
        if site.is_empty() {
            return Err(KeyError::EmptySite);
        }

        let mut points: Vec<String> = point_names
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect();
        points.sort_unstable();
        points.dedup();

        if points.is_empty() {
            return Err(KeyError::EmptyPointSet);
        }

        if start > end {
            return Err(KeyError::InvalidRange {
                start: format_instant(start),
                end: format_instant(end),
            });
        }

        Ok(Self {
            site: site.to_owned(),
            points,
            start,
            end,
            cached_key: OnceLock::new(),
        })
    }

    /// Normalized site identifier.
    pub fn site(&self) -> &str {
        &self.site
    }

    /// Sorted, de-duplicated point names.
    pub fn points(&self) -> &[String] {
        &self.points
    }

    /// Inclusive range start.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Inclusive range end.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Hex SHA-256 digest of the canonical query, computed once.
    pub fn as_cache_key(&self) -> &str {
        self.cached_key.get_or_init(|| {
            let canonical = CanonicalQuery {
                site: &self.site,
                points: &self.points,
                start: format_instant(self.start),
                end: format_instant(self.end),
            };
            // Serializing a struct of strings cannot fail
            let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
            hex::encode(Sha256::digest(&bytes))
        })
    }
}

impl CacheKey for QueryKey {
    fn as_cache_key(&self) -> &str {
        Self::as_cache_key(self)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_cache_key())
    }
}

/// Derive the 64-character cache key for a query.
pub fn generate_key<S: AsRef<str>>(
    site: &str,
    point_names: &[S],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<String, KeyError> {
    Ok(QueryKey::new(site, point_names, start, end)?
        .as_cache_key()
        .to_owned())
}

fn unsafe_path(path: &str, reason: &'static str) -> KeyError {
    KeyError::UnsafePath {
        path: path.to_owned(),
        reason,
    }
}

/// Validate a single storage path segment.
pub fn validate_path_segment(segment: &str) -> Result<(), KeyError> {
    if segment.is_empty() {
        return Err(unsafe_path(segment, "empty segment"));
    }
    if segment == "." {
        return Err(unsafe_path(segment, "current directory segment"));
    }
    if segment == ".." {
        return Err(unsafe_path(segment, "parent directory segment"));
    }
    if segment.contains('/') {
        return Err(unsafe_path(segment, "separator inside segment"));
    }
    if segment.contains('\\') {
        return Err(unsafe_path(segment, "backslash"));
    }
    if segment.chars().any(char::is_control) {
        return Err(unsafe_path(segment, "control character"));
    }
    Ok(())
}

/// Validate a `/`-separated storage prefix such as `hq/2025/01/31`.
pub fn validate_path_prefix(prefix: &str) -> Result<(), KeyError> {
    if prefix.is_empty() {
        return Err(unsafe_path(prefix, "empty prefix"));
    }
    if prefix.starts_with('/') {
        return Err(unsafe_path(prefix, "absolute path"));
    }
    if prefix.contains('\\') {
        return Err(unsafe_path(prefix, "backslash"));
    }

    for segment in prefix.split('/') {
        validate_path_segment(segment).map_err(|err| match err {
            KeyError::UnsafePath { reason, .. } => unsafe_path(prefix, reason),
            other => other,
        })?;
    }
    Ok(())
}

/// Join a validated prefix with a cache key.
pub fn storage_path(prefix: &str, key: &str) -> Result<String, KeyError> {
    validate_path_prefix(prefix)?;
    validate_path_segment(key)?;
    Ok(format!("{prefix}/{key}"))
}
