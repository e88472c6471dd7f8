// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, Dependency};
use crate::correlation::{CorrelationOptions, CorrelationSettings, NvdSettings};
use crate::database::DatabaseConfig;
use crate::orchestrator::OrchestratorSettings;
use crate::registry::DEFAULT_VULNERABILITY_FALLBACK;
use crate::resilience::Resilience;
use crate::retry::RetryConfig;
use crate::scanners::{GvmSettings, ZapSettings};
use crate::types::ScannerKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    #[validate(nested)]
    pub worker: WorkerConfig,

    #[serde(default)]
    #[validate(nested)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    #[validate(nested)]
    pub scanners: ScannersConfig,

    #[serde(default)]
    pub resilience: ResilienceConfig,

    #[serde(default)]
    #[validate(nested)]
    pub correlation: CorrelationConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RedisConfig {
    /// Use the Redis queue; otherwise an in-process queue
    #[serde(default = "default_false")]
    pub enabled: bool,

    #[validate(url)]
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkerConfig {
    /// Scans dispatched concurrently by one process
    #[validate(range(min = 1, max = 1024))]
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long one queue pop blocks before checking for shutdown
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// How long shutdown waits for in-flight scans
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_timeout_secs: default_poll_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrchestratorConfig {
    #[validate(range(min = 1, max = 86400))]
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,

    #[validate(range(min = 1, max = 86400))]
    #[serde(default = "default_engine_timeout")]
    pub engine_timeout_secs: u64,

    #[validate(range(min = 1, max = 60))]
    #[serde(default = "default_cancel_poll")]
    pub cancel_poll_secs: u64,

    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: default_scan_timeout(),
            engine_timeout_secs: default_engine_timeout(),
            cancel_poll_secs: default_cancel_poll(),
            cancel_grace_secs: default_cancel_grace(),
        }
    }
}

impl OrchestratorConfig {
    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
            engine_timeout: Duration::from_secs(self.engine_timeout_secs),
            cancel_poll_interval: Duration::from_secs(self.cancel_poll_secs),
            cancel_grace: Duration::from_secs(self.cancel_grace_secs),
        }
    }
}

/// Engines to register and how to reach them
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScannersConfig {
    #[validate(length(min = 1))]
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    #[validate(length(min = 1))]
    #[serde(default = "default_nuclei_path")]
    pub nuclei_path: String,

    /// Requests per second passed to nuclei
    #[validate(range(min = 1))]
    #[serde(default)]
    pub nuclei_rate_limit: Option<u32>,

    #[serde(default)]
    pub zap: Option<ZapSettings>,

    #[serde(default)]
    pub gvm: Option<GvmSettings>,

    /// Vulnerability engines tried in order when a scan names none
    #[serde(default = "default_fallback")]
    pub vulnerability_fallback: Vec<ScannerKind>,
}

impl Default for ScannersConfig {
    fn default() -> Self {
        Self {
            nmap_path: default_nmap_path(),
            nuclei_path: default_nuclei_path(),
            nuclei_rate_limit: None,
            zap: None,
            gvm: None,
            vulnerability_fallback: default_fallback(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub breaker_overrides: HashMap<Dependency, CircuitBreakerConfig>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub retry_overrides: HashMap<Dependency, RetryConfig>,
}

impl ResilienceConfig {
    /// One breaker registry and retry policy shared by the whole process
    pub fn build(&self) -> Resilience {
        let breakers = CircuitBreakerRegistry::with_overrides(
            self.circuit_breaker.clone(),
            self.breaker_overrides.clone(),
        );
        Resilience::new(Arc::new(breakers), self.retry.clone())
            .with_retry_overrides(self.retry_overrides.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CorrelationConfig {
    #[serde(default)]
    pub nvd: NvdSettings,

    /// Cached CVE records older than this are fetched again
    #[validate(range(min = 60))]
    #[serde(default = "default_cve_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[validate(range(min = 1, max = 2000))]
    #[serde(default = "default_max_cves")]
    pub max_cves: usize,

    #[serde(default = "default_display_cap")]
    pub display_cap: usize,

    #[serde(default = "default_true")]
    pub auto_create: bool,

    #[validate(range(min = 0.0, max = 10.0))]
    #[serde(default)]
    pub min_cvss: Option<f32>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            nvd: NvdSettings::default(),
            cache_ttl_secs: default_cve_cache_ttl(),
            max_cves: default_max_cves(),
            display_cap: default_display_cap(),
            auto_create: true,
            min_cvss: None,
        }
    }
}

impl CorrelationConfig {
    pub fn settings(&self) -> CorrelationSettings {
        CorrelationSettings {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            display_cap: self.display_cap,
        }
    }

    /// Options used for correlation triggered by a completed scan
    pub fn options(&self) -> CorrelationOptions {
        CorrelationOptions {
            max_cves: self.max_cves,
            auto_create: self.auto_create,
            min_cvss: self.min_cvss,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with process environment
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            self.redis.url = redis_url;
            self.redis.enabled = true;
        }

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            self.database.database_url = db_url;
            self.database.enabled = true;
        }

        if let Ok(workers) = std::env::var("WORKERS") {
            self.worker.workers = workers.parse().context("Invalid WORKERS")?;
        }

        if let Ok(timeout) = std::env::var("SCAN_TIMEOUT_SECS") {
            self.orchestrator.scan_timeout_secs = timeout.parse().context("Invalid SCAN_TIMEOUT_SECS")?;
        }

        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            self.observability.log_level = log_level;
        }

        if let Ok(key) = std::env::var("NVD_API_KEY") {
            if !key.is_empty() {
                self.correlation.nvd.api_key = Some(key);
            }
        }

        if let Ok(path) = std::env::var("NMAP_PATH") {
            self.scanners.nmap_path = path;
        }

        if let Ok(path) = std::env::var("NUCLEI_PATH") {
            self.scanners.nuclei_path = path;
        }

        if let Ok(url) = std::env::var("ZAP_URL") {
            let mut zap = self.scanners.zap.take().unwrap_or_else(|| ZapSettings::new(url.clone()));
            zap.base_url = url;
            if let Ok(key) = std::env::var("ZAP_API_KEY") {
                zap.api_key = Some(key);
            }
            self.scanners.zap = Some(zap);
        }

        if let Ok(url) = std::env::var("GVM_URL") {
            let username = std::env::var("GVM_USERNAME").unwrap_or_else(|_| "admin".to_string());
            let password = std::env::var("GVM_PASSWORD").unwrap_or_default();
            let mut gvm = self
                .scanners
                .gvm
                .take()
                .unwrap_or_else(|| GvmSettings::new(url.clone(), username.clone(), password.clone()));
            gvm.base_url = url;
            if std::env::var("GVM_USERNAME").is_ok() {
                gvm.username = username;
            }
            if std::env::var("GVM_PASSWORD").is_ok() {
                gvm.password = password;
            }
            self.scanners.gvm = Some(gvm);
        }

        Ok(())
    }
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_poll_timeout() -> u64 {
    5
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_scan_timeout() -> u64 {
    3600
}

fn default_engine_timeout() -> u64 {
    1800
}

fn default_cancel_poll() -> u64 {
    2
}

fn default_cancel_grace() -> u64 {
    5
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_nuclei_path() -> String {
    "nuclei".to_string()
}

fn default_fallback() -> Vec<ScannerKind> {
    DEFAULT_VULNERABILITY_FALLBACK.to_vec()
}

fn default_cve_cache_ttl() -> u64 {
    7 * 24 * 3600
}

fn default_max_cves() -> usize {
    50
}

fn default_display_cap() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scanners.vulnerability_fallback, vec![ScannerKind::Nuclei, ScannerKind::Gvm]);
        assert_eq!(config.orchestrator.settings().scan_timeout, Duration::from_secs(3600));
        assert!(!config.database.enabled);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.worker.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resilience_overrides_apply() {
        let mut config = ResilienceConfig::default();
        config
            .retry_overrides
            .insert(Dependency::Nvd, RetryConfig::default().with_max_attempts(6));

        let resilience = config.build();
        assert_eq!(resilience.retry_config(Dependency::Nvd).max_attempts, 6);
        assert_eq!(resilience.retry_config(Dependency::Nmap).max_attempts, 3);
    }
}
