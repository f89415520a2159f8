//! Retry policy implementation with exponential backoff

use rand::{RngExt, rng};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial call
    pub max_attempts: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Create retry policy from environment variables
    pub fn from_env() -> Self {
        Self {
            max_attempts: env_or("VITALS_MAX_RETRIES", 3),
            initial_backoff: Duration::from_millis(env_or("VITALS_RETRY_BACKOFF", 100)),
            max_backoff: Duration::from_secs(env_or("VITALS_MAX_BACKOFF", 10)),
            multiplier: env_or("VITALS_BACKOFF_MULTIPLIER", 2.0),
            jitter: env_or("VITALS_RETRY_JITTER", true),
        }
    }

    /// Validate the policy
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("backoff multiplier must be a finite value >= 1.0".to_string());
        }
        if self.initial_backoff > self.max_backoff {
            return Err("initial backoff must not exceed max backoff".to_string());
        }
        Ok(())
    }

    /// Execute a function with retry logic
    ///
    /// The closure is called once, then up to `max_attempts` more times while
    /// it keeps failing with a retryable error.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_until(None, f).await
    }

    /// Execute with retry logic, never starting an attempt at or past
    /// `deadline`.
    ///
    /// When the next backoff would end at or after the deadline the last
    /// error is returned immediately.
    pub async fn execute_until<F, Fut, T>(&self, deadline: Option<Instant>, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) if !e.should_retry() || attempt >= self.max_attempts => {
                    return Err(e);
                }
                Err(e) => {
                    let mut delay = backoff;
                    if self.jitter {
                        let jitter = rng().random_range(0.0..0.3);
                        #[allow(clippy::cast_precision_loss)]
                        let jitter_ms = (delay.as_millis() as f64 * jitter) as u64;
                        delay += Duration::from_millis(jitter_ms);
                    }

                    if let Some(deadline) = deadline
                        && Instant::now() + delay >= deadline
                    {
                        tracing::debug!("No time left to retry after attempt {}: {}", attempt + 1, e);
                        return Err(e);
                    }

                    attempt += 1;
                    tracing::warn!("Attempt {} failed: {}", attempt, e);

                    tokio::time::sleep(delay).await;

                    backoff = Duration::from_secs_f64(
                        (backoff.as_secs_f64() * self.multiplier)
                            .min(self.max_backoff.as_secs_f64()),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(
    unsafe_code,
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::significant_drop_tightening
)]
mod tests {
    use super::*;
    use crate::error::RouterError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    const ENV_VARS: [&str; 5] = [
        "VITALS_MAX_RETRIES",
        "VITALS_RETRY_BACKOFF",
        "VITALS_MAX_BACKOFF",
        "VITALS_BACKOFF_MULTIPLIER",
        "VITALS_RETRY_JITTER",
    ];

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            multiplier: 2.0,
            jitter: false,
        }
    }

    fn timeout_error() -> RouterError {
        RouterError::Timeout {
            store: "hot",
            query: "hq [1 points]".to_string(),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_secs(10));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(policy.jitter);
        assert!(policy.validate().is_ok());
    }

    // Single test so the process-wide env mutations cannot interleave
    #[test]
    fn test_from_env() {
        for var in ENV_VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
        assert_eq!(RetryPolicy::from_env(), RetryPolicy::default());

        unsafe {
            std::env::set_var("VITALS_MAX_RETRIES", "5");
            std::env::set_var("VITALS_RETRY_BACKOFF", "200");
            std::env::set_var("VITALS_MAX_BACKOFF", "20");
            std::env::set_var("VITALS_BACKOFF_MULTIPLIER", "1.5");
            std::env::set_var("VITALS_RETRY_JITTER", "false");
        }

        let policy = RetryPolicy::from_env();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(200));
        assert_eq!(policy.max_backoff, Duration::from_secs(20));
        assert!((policy.multiplier - 1.5).abs() < f64::EPSILON);
        assert!(!policy.jitter);

        for var in ENV_VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut policy = RetryPolicy::default();
        policy.multiplier = 0.5;
        assert!(policy.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = fast_policy(3)
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(timeout_error())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.expect("Operation should succeed"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_stops_on_non_retryable_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = fast_policy(3)
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(RouterError::Validation("bad range".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(RouterError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_surfaces_final_error_after_exhaustion() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let start = Instant::now();

        let result: Result<()> = fast_policy(4)
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(timeout_error()) }
            })
            .await;

        assert!(matches!(result, Err(RouterError::Timeout { store: "hot", .. })));
        // initial + 4 retries
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // 10 + 20 + 40 + 50 (capped)
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(120));
        assert!(elapsed < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_until_does_not_retry_past_deadline() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let start = Instant::now();
        let deadline = start + Duration::from_millis(25);

        let result: Result<()> = fast_policy(5)
            .execute_until(Some(deadline), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(timeout_error()) }
            })
            .await;

        assert!(matches!(result, Err(RouterError::Timeout { .. })));
        // 10ms backoff fits, the following 20ms would end past the deadline
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() < Duration::from_millis(25));
    }
}
