//! Cache configuration structures
//!
//! [`MemoryCacheConfig`] sizes the in-memory backend. [`TtlPolicy`] decides
//! how long a finished query payload may be served from cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Memory cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries in the cache
    pub max_entries: usize,
    /// Maximum payload bytes held (None for unlimited)
    pub max_memory_bytes: Option<usize>,
    /// TTL used by `put` when no explicit TTL is given
    pub default_ttl: Duration,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_memory_bytes: Some(256 * 1024 * 1024), // 256 MB
            default_ttl: Duration::from_secs(120),
        }
    }
}

impl MemoryCacheConfig {
    /// Create a new memory cache configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of entries
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set maximum memory usage
    pub fn with_max_memory(mut self, max_bytes: usize) -> Self {
        self.max_memory_bytes = Some(max_bytes);
        self
    }

    /// Set default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }

        if let Some(max_bytes) = self.max_memory_bytes
            && max_bytes == 0
        {
            return Err("max_memory_bytes must be greater than 0".to_string());
        }

        if self.default_ttl.is_zero() {
            return Err("default_ttl must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// TTL selection for finished query payloads
///
/// A range whose end lies more than `grace` before now is closed: its
/// samples no longer change, so it is cached for `long_ttl`. Anything
/// touching the recent past gets `short_ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    /// TTL for closed ranges
    pub long_ttl: Duration,
    /// TTL for ranges near now
    pub short_ttl: Duration,
    /// How far before now a range must end to count as closed
    pub grace: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            long_ttl: Duration::from_secs(6 * 3600),
            short_ttl: Duration::from_secs(120),
            grace: Duration::from_secs(3600),
        }
    }
}

impl TtlPolicy {
    /// Create the default policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the closed-range TTL
    pub fn with_long_ttl(mut self, ttl: Duration) -> Self {
        self.long_ttl = ttl;
        self
    }

    /// Set the near-now TTL
    pub fn with_short_ttl(mut self, ttl: Duration) -> Self {
        self.short_ttl = ttl;
        self
    }

    /// Set the closed-range grace window
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// TTL for a range ending at `end`, evaluated at `now`
    pub fn ttl_for(&self, end: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let grace = chrono::Duration::from_std(self.grace).unwrap_or(chrono::Duration::MAX);
        match now.checked_sub_signed(grace) {
            Some(closed_before) if end < closed_before => self.long_ttl,
            _ => self.short_ttl,
        }
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), String> {
        if self.short_ttl.is_zero() {
            return Err("short_ttl must be greater than 0".to_string());
        }

        if self.long_ttl < self.short_ttl {
            return Err("long_ttl must not be shorter than short_ttl".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
            .single()
            .expect("valid test date")
    }

    #[test]
    fn test_memory_config_validation() {
        assert!(MemoryCacheConfig::new().validate().is_ok());
        assert!(
            MemoryCacheConfig::new()
                .with_max_entries(0)
                .validate()
                .is_err()
        );
        assert!(
            MemoryCacheConfig::new()
                .with_max_memory(0)
                .validate()
                .is_err()
        );
        assert!(
            MemoryCacheConfig::new()
                .with_default_ttl(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_closed_range_gets_long_ttl() {
        let policy = TtlPolicy::default();
        let end = now() - chrono::Duration::days(2);
        assert_eq!(policy.ttl_for(end, now()), Duration::from_secs(6 * 3600));
    }

    #[test]
    fn test_recent_range_gets_short_ttl() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl_for(now(), now()), Duration::from_secs(120));
        assert_eq!(
            policy.ttl_for(now() - chrono::Duration::minutes(30), now()),
            Duration::from_secs(120)
        );
        // Ranges that end in the future are never closed
        assert_eq!(
            policy.ttl_for(now() + chrono::Duration::hours(1), now()),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_grace_boundary_is_exclusive() {
        let policy = TtlPolicy::default();
        let boundary = now() - chrono::Duration::hours(1);
        assert_eq!(policy.ttl_for(boundary, now()), policy.short_ttl);
        assert_eq!(
            policy.ttl_for(boundary - chrono::Duration::milliseconds(1), now()),
            policy.long_ttl
        );
    }

    #[test]
    fn test_ttl_policy_validation() {
        assert!(TtlPolicy::default().validate().is_ok());
        assert!(
            TtlPolicy::default()
                .with_short_ttl(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            TtlPolicy::default()
                .with_long_ttl(Duration::from_secs(1))
                .validate()
                .is_err()
        );
    }
}
