// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use anyhow::{Context, Result};
use std::collections::HashSet;
use validator::Validate;

use super::core::AppConfig;
use crate::types::ScannerKind;

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate_app_config(config: &AppConfig) -> Result<()> {
        config.validate()
            .context("Configuration validation failed")?;

        Self::validate_redis_config(config)?;
        Self::validate_database_config(config)?;
        Self::validate_scanner_config(config)?;
        Self::validate_resilience_config(config)?;
        Self::validate_correlation_config(config)?;

        Ok(())
    }

    fn validate_redis_config(config: &AppConfig) -> Result<()> {
        if !config.redis.enabled {
            return Ok(());
        }

        if !config.redis.url.starts_with("redis://") && !config.redis.url.starts_with("rediss://") {
            return Err(anyhow::anyhow!(
                "Redis URL must start with redis:// or rediss://"
            ));
        }

        Ok(())
    }

    fn validate_database_config(config: &AppConfig) -> Result<()> {
        if !config.database.enabled {
            return Ok(());
        }

        if config.database.database_url.is_empty() {
            return Err(anyhow::anyhow!("Database URL cannot be empty when database is enabled"));
        }

        if !config.database.database_url.starts_with("postgresql://")
            && !config.database.database_url.starts_with("postgres://") {
            return Err(anyhow::anyhow!(
                "Database URL must start with postgresql:// or postgres://"
            ));
        }

        if config.database.pool_size == 0 {
            return Err(anyhow::anyhow!("Database pool size must be greater than 0"));
        }

        Ok(())
    }

    fn validate_scanner_config(config: &AppConfig) -> Result<()> {
        let scanners = &config.scanners;

        let mut seen = HashSet::new();
        for kind in &scanners.vulnerability_fallback {
            if *kind == ScannerKind::Nmap {
                return Err(anyhow::anyhow!("nmap cannot be a vulnerability fallback engine"));
            }
            if !seen.insert(*kind) {
                return Err(anyhow::anyhow!("Duplicate fallback engine: {}", kind));
            }
        }

        if let Some(zap) = &scanners.zap {
            url::Url::parse(&zap.base_url)
                .with_context(|| format!("Invalid ZAP URL: {}", zap.base_url))?;
        }

        if let Some(gvm) = &scanners.gvm {
            url::Url::parse(&gvm.base_url)
                .with_context(|| format!("Invalid GVM URL: {}", gvm.base_url))?;
            if gvm.username.is_empty() {
                return Err(anyhow::anyhow!("GVM username cannot be empty"));
            }
        }

        if config.orchestrator.engine_timeout_secs > config.orchestrator.scan_timeout_secs {
            return Err(anyhow::anyhow!(
                "Engine timeout ({}s) cannot exceed scan timeout ({}s)",
                config.orchestrator.engine_timeout_secs,
                config.orchestrator.scan_timeout_secs
            ));
        }

        Ok(())
    }

    fn validate_resilience_config(config: &AppConfig) -> Result<()> {
        let resilience = &config.resilience;
        let breakers = std::iter::once(&resilience.circuit_breaker).chain(resilience.breaker_overrides.values());
        for breaker in breakers {
            if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
                return Err(anyhow::anyhow!("Circuit breaker thresholds must be greater than 0"));
            }
        }

        let retries = std::iter::once(&resilience.retry).chain(resilience.retry_overrides.values());
        for retry in retries {
            if retry.max_attempts == 0 {
                return Err(anyhow::anyhow!("Retry max_attempts must be at least 1"));
            }
            if retry.backoff_multiplier < 1.0 {
                return Err(anyhow::anyhow!("Retry backoff multiplier must be at least 1.0"));
            }
        }

        Ok(())
    }

    fn validate_correlation_config(config: &AppConfig) -> Result<()> {
        let nvd = &config.correlation.nvd;

        url::Url::parse(&nvd.base_url)
            .with_context(|| format!("Invalid CVE API URL: {}", nvd.base_url))?;

        if nvd.results_per_page == 0 || nvd.results_per_page > 2000 {
            return Err(anyhow::anyhow!("CVE API page size must be between 1 and 2000"));
        }

        if nvd.max_pages == 0 {
            return Err(anyhow::anyhow!("CVE API page limit must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::Dependency;
    use crate::retry::RetryConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate_app_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_nmap_as_fallback_rejected() {
        let mut config = AppConfig::default();
        config.scanners.vulnerability_fallback = vec![ScannerKind::Nuclei, ScannerKind::Nmap];
        assert!(ConfigValidator::validate_app_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_fallback_rejected() {
        let mut config = AppConfig::default();
        config.scanners.vulnerability_fallback = vec![ScannerKind::Gvm, ScannerKind::Gvm];
        assert!(ConfigValidator::validate_app_config(&config).is_err());
    }

    #[test]
    fn test_database_url_scheme() {
        let mut config = AppConfig::default();
        config.database.enabled = true;
        config.database.database_url = "mysql://localhost/db".to_string();
        assert!(ConfigValidator::validate_app_config(&config).is_err());
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let mut config = AppConfig::default();
        config
            .resilience
            .retry_overrides
            .insert(Dependency::Gvm, RetryConfig::default().with_max_attempts(0));
        assert!(ConfigValidator::validate_app_config(&config).is_err());
    }

    #[test]
    fn test_engine_timeout_bounded_by_scan_timeout() {
        let mut config = AppConfig::default();
        config.orchestrator.scan_timeout_secs = 60;
        config.orchestrator.engine_timeout_secs = 120;
        assert!(ConfigValidator::validate_app_config(&config).is_err());
    }
}
