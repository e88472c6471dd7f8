// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Resilience Layer
 * Circuit breaker around retry for every outbound dependency call
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitSnapshot, Dependency};
use crate::errors::ScannerResult;
use crate::retry::{retry_with_backoff, RetryConfig};

/// Shared resilience policy. The breaker is the outer wrapper and the retry
/// loop the inner one, so an operation that exhausts its retries counts as a
/// single failure against the breaker.
#[derive(Clone)]
pub struct Resilience {
    breakers: Arc<CircuitBreakerRegistry>,
    default_retry: RetryConfig,
    retry_overrides: Arc<HashMap<Dependency, RetryConfig>>,
}

impl Resilience {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>, default_retry: RetryConfig) -> Self {
        Self {
            breakers,
            default_retry,
            retry_overrides: Arc::new(HashMap::new()),
        }
    }

    pub fn with_retry_overrides(mut self, overrides: HashMap<Dependency, RetryConfig>) -> Self {
        self.retry_overrides = Arc::new(overrides);
        self
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn retry_config(&self, dependency: Dependency) -> &RetryConfig {
        self.retry_overrides
            .get(&dependency)
            .unwrap_or(&self.default_retry)
    }

    /// Run `operation` against `dependency`. An open breaker rejects the call
    /// before any attempt is made.
    pub async fn execute<F, Fut, T>(
        &self,
        dependency: Dependency,
        operation_name: &str,
        operation: F,
    ) -> ScannerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ScannerResult<T>>,
    {
        let breaker = self.breakers.get(dependency);
        let retry = self.retry_config(dependency);

        debug!(dependency = %dependency, operation = operation_name, "Calling dependency");

        breaker
            .call(retry_with_backoff(retry, operation_name, operation))
            .await
    }

    pub async fn snapshot(&self) -> Vec<CircuitSnapshot> {
        self.breakers.snapshot().await
    }
}

impl Default for Resilience {
    fn default() -> Self {
        Self::new(Arc::new(CircuitBreakerRegistry::default()), RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::errors::ScannerError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn resilience(failure_threshold: u32, attempts: u32) -> Resilience {
        let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold,
            success_threshold: 1,
            open_timeout: Duration::from_secs(60),
        });
        Resilience::new(
            Arc::new(breakers),
            RetryConfig::default()
                .with_max_attempts(attempts)
                .with_base_delay(Duration::from_millis(1))
                .without_jitter(),
        )
    }

    fn network_error() -> ScannerError {
        ScannerError::Network {
            url: "https://services.nvd.nist.gov".to_string(),
            reason: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_exhausted_retries_count_once_against_breaker() {
        let r = resilience(2, 3);
        let calls = AtomicU32::new(0);

        let result: ScannerResult<()> = r
            .execute(Dependency::Nvd, "nvd_search", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(network_error()) }
            })
            .await;

        assert!(matches!(result, Err(ScannerError::RetryExhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let snap = r.breakers().get(Dependency::Nvd).snapshot().await;
        assert_eq!(snap.failure_count, 1);
        assert_eq!(snap.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_operation() {
        let r = resilience(5, 1);
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let _: ScannerResult<()> = r
                .execute(Dependency::Nvd, "nvd_search", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(network_error()) }
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let sixth: ScannerResult<()> = r
            .execute(Dependency::Nvd, "nvd_search", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(sixth, Err(ScannerError::CircuitOpen { dependency: Dependency::Nvd })));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_per_dependency_retry_override() {
        let mut overrides = HashMap::new();
        overrides.insert(Dependency::Gvm, RetryConfig::no_retry());
        let r = resilience(5, 4).with_retry_overrides(overrides);

        assert_eq!(r.retry_config(Dependency::Gvm).max_attempts, 1);
        assert_eq!(r.retry_config(Dependency::Nmap).max_attempts, 4);
    }
}
