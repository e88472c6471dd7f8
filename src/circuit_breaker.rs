// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Circuit Breaker Pattern
 * Stops calling a failing dependency (scanner engine, CVE API) for a cooldown
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{ScannerError, ScannerResult};

/// External dependencies guarded by a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dependency {
    Nmap,
    Nuclei,
    Zap,
    Gvm,
    Nvd,
}

impl Dependency {
    pub const ALL: [Dependency; 5] = [
        Dependency::Nmap,
        Dependency::Nuclei,
        Dependency::Zap,
        Dependency::Gvm,
        Dependency::Nvd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::Nmap => "nmap",
            Dependency::Nuclei => "nuclei",
            Dependency::Zap => "zap",
            Dependency::Gvm => "gvm",
            Dependency::Nvd => "nvd",
        }
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct CircuitStatus {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitStatus {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.success_count = 0;
        self.trial_in_flight = false;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before opening
    pub failure_threshold: u32,
    /// Consecutive successes in HALF_OPEN before closing
    pub success_threshold: u32,
    /// Cooldown before an OPEN breaker lets a trial call through
    #[serde(with = "duration_secs")]
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("open_timeout must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub dependency: Dependency,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub open_for: Option<Duration>,
}

/// Permission to make one call through a breaker. A half-open trial permit
/// dropped without an outcome (the call's future was cancelled) gives the
/// trial slot back.
#[must_use]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl std::fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPermit")
            .field("dependency", &self.breaker.dependency)
            .field("trial", &self.trial)
            .finish()
    }
}

impl CallPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    fn settle(mut self) -> bool {
        self.settled = true;
        self.trial
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            debug!(dependency = %self.breaker.dependency, "Trial call abandoned, releasing slot");
            self.breaker.release_trial();
        }
    }
}

/// Breaker for one named dependency. All transitions happen under a single
/// mutex so concurrent callers observe a consistent state.
pub struct CircuitBreaker {
    dependency: Dependency,
    config: CircuitBreakerConfig,
    status: Mutex<CircuitStatus>,
}

impl CircuitBreaker {
    pub fn new(dependency: Dependency, config: CircuitBreakerConfig) -> Self {
        Self {
            dependency,
            config,
            status: Mutex::new(CircuitStatus::new()),
        }
    }

    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    /// Ask to make a call. Rejected with `CircuitOpen` while the breaker is
    /// open, or while the single half-open trial call is in flight.
    pub async fn acquire(&self) -> ScannerResult<CallPermit<'_>> {
        let mut status = self.status.lock();

        match status.state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let elapsed = status
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.config.open_timeout);
                if elapsed >= self.config.open_timeout {
                    debug!(dependency = %self.dependency, "Circuit breaker transitioning to half-open");
                    status.state = CircuitState::HalfOpen;
                    status.success_count = 0;
                    status.trial_in_flight = true;
                    Ok(self.permit(true))
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                if status.trial_in_flight {
                    Err(self.open_error())
                } else {
                    status.trial_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    fn permit(&self, trial: bool) -> CallPermit<'_> {
        CallPermit {
            breaker: self,
            trial,
            settled: false,
        }
    }

    fn release_trial(&self) {
        let mut status = self.status.lock();
        if status.state == CircuitState::HalfOpen {
            status.trial_in_flight = false;
        }
    }

    pub async fn record_success(&self, permit: CallPermit<'_>) {
        let trial = permit.settle();
        let mut status = self.status.lock();

        match status.state {
            CircuitState::Closed => {
                status.failure_count = 0;
            }
            CircuitState::HalfOpen if trial => {
                status.trial_in_flight = false;
                status.success_count += 1;
                if status.success_count >= self.config.success_threshold {
                    info!(
                        dependency = %self.dependency,
                        successes = status.success_count,
                        "Circuit breaker closing"
                    );
                    status.state = CircuitState::Closed;
                    status.failure_count = 0;
                    status.success_count = 0;
                    status.opened_at = None;
                }
            }
            // Late result from a call admitted before the breaker tripped
            _ => {}
        }
    }

    pub async fn record_failure(&self, permit: CallPermit<'_>) {
        let trial = permit.settle();
        let mut status = self.status.lock();

        match status.state {
            CircuitState::Closed => {
                status.failure_count += 1;
                if status.failure_count >= self.config.failure_threshold {
                    warn!(
                        dependency = %self.dependency,
                        failures = status.failure_count,
                        "Circuit breaker opening after consecutive failures"
                    );
                    status.open();
                }
            }
            CircuitState::HalfOpen if trial => {
                warn!(
                    dependency = %self.dependency,
                    "Circuit breaker reopening after failure in half-open state"
                );
                status.failure_count += 1;
                status.open();
            }
            _ => {}
        }
    }

    /// Give back a permit whose call failed for a reason unrelated to the
    /// dependency's health (validation, cancellation)
    pub async fn release(&self, permit: CallPermit<'_>) {
        if permit.settle() {
            self.release_trial();
        }
    }

    /// Run `operation` through the breaker. The whole future counts as one
    /// call, so a retried operation placed inside counts once. Dropping the
    /// returned future mid-call counts as neither success nor failure.
    pub async fn call<T, Fut>(&self, operation: Fut) -> ScannerResult<T>
    where
        Fut: Future<Output = ScannerResult<T>>,
    {
        let permit = self.acquire().await?;

        match operation.await {
            Ok(value) => {
                self.record_success(permit).await;
                Ok(value)
            }
            Err(err) => {
                if err.counts_as_dependency_failure() {
                    self.record_failure(permit).await;
                } else {
                    self.release(permit).await;
                }
                Err(err)
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.status.lock().state
    }

    pub async fn snapshot(&self) -> CircuitSnapshot {
        let status = self.status.lock();
        CircuitSnapshot {
            dependency: self.dependency,
            state: status.state,
            failure_count: status.failure_count,
            success_count: status.success_count,
            open_for: match status.state {
                CircuitState::Open => status.opened_at.map(|t| t.elapsed()),
                _ => None,
            },
        }
    }

    /// Force the breaker closed
    pub async fn reset(&self) {
        let mut status = self.status.lock();
        debug!(dependency = %self.dependency, "Resetting circuit breaker");
        *status = CircuitStatus::new();
    }

    fn open_error(&self) -> ScannerError {
        ScannerError::CircuitOpen {
            dependency: self.dependency,
        }
    }
}

/// One breaker per dependency, built once and shared by every caller
pub struct CircuitBreakerRegistry {
    breakers: HashMap<Dependency, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Same settings for every dependency
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_overrides(config, HashMap::new())
    }

    /// Default settings with per-dependency overrides
    pub fn with_overrides(
        default: CircuitBreakerConfig,
        overrides: HashMap<Dependency, CircuitBreakerConfig>,
    ) -> Self {
        let breakers = Dependency::ALL
            .iter()
            .map(|dep| {
                let config = overrides.get(dep).cloned().unwrap_or_else(|| default.clone());
                (*dep, Arc::new(CircuitBreaker::new(*dep, config)))
            })
            .collect();

        Self { breakers }
    }

    pub fn get(&self, dependency: Dependency) -> Arc<CircuitBreaker> {
        // Every variant of Dependency is inserted at construction
        Arc::clone(&self.breakers[&dependency])
    }

    pub async fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut out = Vec::with_capacity(self.breakers.len());
        for dep in Dependency::ALL {
            out.push(self.breakers[&dep].snapshot().await);
        }
        out
    }

    pub async fn reset(&self, dependency: Dependency) {
        self.breakers[&dependency].reset().await;
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
