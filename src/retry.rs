// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Retry Logic with Exponential Backoff
 * Capped exponential backoff with full jitter and an allow-list of error kinds
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use crate::errors::{ErrorKind, ScannerError, ScannerResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry configuration with exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Delay ceiling before the second attempt
    #[serde(with = "millis")]
    pub base_delay: Duration,

    /// Maximum backoff duration
    #[serde(with = "millis")]
    pub max_delay: Duration,

    /// Backoff multiplier (typically 2.0 for exponential)
    pub backoff_multiplier: f64,

    /// Draw the delay uniformly from [0, ceiling] instead of sleeping the ceiling
    pub enable_jitter: bool,

    /// Error kinds worth another attempt
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            enable_jitter: true,
            retryable: ErrorKind::default_retryable(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_retryable(mut self, kinds: Vec<ErrorKind>) -> Self {
        self.retryable = kinds;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.enable_jitter = false;
        self
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn is_retryable(&self, err: &ScannerError) -> bool {
        let kind = err.kind();
        kind != ErrorKind::Validation && self.retryable.contains(&kind)
    }

    /// Upper bound of the delay after failed attempt `attempt` (1-based):
    /// `min(base_delay * multiplier^(attempt-1), max_delay)`
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_secs(0);
        }

        let exp = (attempt - 1).min(i32::MAX as u32) as i32;
        let base = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exp);
        let capped = base.min(self.max_delay.as_millis() as f64);

        if capped > 0.0 {
            Duration::from_millis(capped as u64)
        } else {
            Duration::from_secs(0)
        }
    }

    /// Calculate backoff duration for a given attempt
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);

        if self.enable_jitter && !ceiling.is_zero() {
            let mut rng = rand::rng();
            let ms = rng.random_range(0..=ceiling.as_millis() as u64);
            Duration::from_millis(ms)
        } else {
            ceiling
        }
    }
}

/// Retry a future with exponential backoff.
///
/// Errors outside the allow-list are returned unchanged on first sight.
/// Running out of attempts on retryable errors yields `RetryExhausted`.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> ScannerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ScannerResult<T>>,
{
    let started = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        debug!(
            attempt = attempt,
            max_attempts = max_attempts,
            operation = operation_name,
            "Executing operation"
        );

        let err = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        attempt = attempt,
                        operation = operation_name,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => err,
        };

        let retryable = config.is_retryable(&err);

        warn!(
            attempt = attempt,
            max_attempts = max_attempts,
            operation = operation_name,
            error = %err,
            retryable = retryable,
            "Operation failed"
        );

        if !retryable {
            debug!(operation = operation_name, "Error is not retryable, aborting");
            return Err(err);
        }

        if attempt >= max_attempts {
            warn!(
                operation = operation_name,
                attempts = attempt,
                "Max retry attempts reached"
            );
            return Err(ScannerError::RetryExhausted {
                operation: operation_name.to_string(),
                attempts: attempt,
                last_error: Box::new(err),
                elapsed: started.elapsed(),
            });
        }

        // A server-supplied Retry-After never pushes past this attempt's ceiling
        let backoff = match err.retry_delay() {
            Some(hint) => hint.min(config.backoff_ceiling(attempt)),
            None => config.calculate_backoff(attempt),
        };

        debug!(
            attempt = attempt,
            backoff_ms = backoff.as_millis() as u64,
            operation = operation_name,
            "Backing off before retry"
        );

        tokio::time::sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{EngineError, TargetError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn timeout() -> ScannerError {
        ScannerError::Timeout {
            duration: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let config = RetryConfig::default()
            .with_max_attempts(5)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10))
            .without_jitter();

        assert_eq!(config.calculate_backoff(0), Duration::from_secs(0));
        assert_eq!(config.calculate_backoff(1), Duration::from_millis(100));
        assert_eq!(config.calculate_backoff(2), Duration::from_millis(200));
        assert_eq!(config.calculate_backoff(3), Duration::from_millis(400));
        assert_eq!(config.calculate_backoff(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_with_max_cap() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .without_jitter();

        assert_eq!(config.calculate_backoff(3), Duration::from_secs(4));
        assert_eq!(config.calculate_backoff(4), Duration::from_secs(5));
        assert_eq!(config.calculate_backoff(60), Duration::from_secs(5));
    }

    #[test]
    fn test_jittered_backoff_stays_within_ceiling() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_millis(300));

        for attempt in 1..10 {
            let ceiling = config.backoff_ceiling(attempt);
            for _ in 0..50 {
                assert!(config.calculate_backoff(attempt) <= ceiling);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_eventually() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let config = RetryConfig::default().with_max_attempts(3).without_jitter();

        let result: ScannerResult<&str> = retry_with_backoff(&config, "test_operation", || {
            let counter = Arc::clone(&counter_clone);
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(timeout())
                } else {
                    Ok("Success")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "Success");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_reports_attempts_and_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let config = RetryConfig::default().with_max_attempts(3).without_jitter();

        let result: ScannerResult<()> = retry_with_backoff(&config, "nmap_run", || {
            let counter = Arc::clone(&counter_clone);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ScannerError::Engine(EngineError::Crashed {
                    engine: "nmap".to_string(),
                    code: Some(2),
                    stderr: "boom".to_string(),
                }))
            }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        match result {
            Err(ScannerError::RetryExhausted {
                operation,
                attempts,
                last_error,
                ..
            }) => {
                assert_eq!(operation, "nmap_run");
                assert_eq!(attempts, 3);
                assert!(matches!(*last_error, ScannerError::Engine(EngineError::Crashed { .. })));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_stops_on_non_retryable_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let config = RetryConfig::default().with_max_attempts(5).without_jitter();

        let result: ScannerResult<()> = retry_with_backoff(&config, "test_operation", || {
            let counter = Arc::clone(&counter_clone);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ScannerError::Configuration("Invalid config".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(ScannerError::Configuration(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_never_retried_even_if_allow_listed() {
        let counter = AtomicU32::new(0);
        let config = RetryConfig::default()
            .with_retryable(vec![ErrorKind::Validation, ErrorKind::Timeout])
            .without_jitter();

        let result: ScannerResult<()> = retry_with_backoff(&config, "validate", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(ScannerError::Validation(TargetError::Empty)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_delay_is_capped() {
        let config = RetryConfig::default()
            .with_max_attempts(2)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(30));
        let started = Instant::now();
        let calls = AtomicU32::new(0);

        let _: ScannerResult<()> = retry_with_backoff(&config, "nvd", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ScannerError::RateLimited {
                    dependency: "nvd".to_string(),
                    retry_after: Some(Duration::from_secs(20)),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() <= config.backoff_ceiling(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_retry_after_is_honoured() {
        let config = RetryConfig::default()
            .with_max_attempts(2)
            .with_base_delay(Duration::from_secs(10))
            .without_jitter();
        let started = Instant::now();

        let _: ScannerResult<()> = retry_with_backoff(&config, "nvd", || async {
            Err(ScannerError::RateLimited {
                dependency: "nvd".to_string(),
                retry_after: Some(Duration::from_secs(2)),
            })
        })
        .await;

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
    }
}
