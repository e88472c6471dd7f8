// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Correlation Engine
 * Resolves discovered services to known CVEs (cache first, CVE API second)
 * and materializes Vulnerability records idempotently
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cpe::{build_cpe, CpeMatch};
use super::nvd::CveSource;
use crate::circuit_breaker::Dependency;
use crate::database::Store;
use crate::errors::{ScannerError, ScannerResult};
use crate::resilience::Resilience;
use crate::types::{CveCacheEntry, Service, Severity, Vulnerability};

/// Per-call correlation knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationOptions {
    /// Most vulnerabilities materialized per service
    #[serde(default = "default_max_cves")]
    pub max_cves: usize,
    #[serde(default = "default_auto_create")]
    pub auto_create: bool,
    /// CVEs scored below this are ignored
    #[serde(default)]
    pub min_cvss: Option<f32>,
}

fn default_max_cves() -> usize {
    50
}

fn default_auto_create() -> bool {
    true
}

impl Default for CorrelationOptions {
    fn default() -> Self {
        Self {
            max_cves: default_max_cves(),
            auto_create: default_auto_create(),
            min_cvss: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStatus {
    Success,
    NoCpe,
    NoCves,
    Error,
}

/// Outcome of correlating one service. Failures are reported here, never raised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationResult {
    pub service_id: Uuid,
    pub status: CorrelationStatus,
    pub cpe: Option<String>,
    pub cpe_confidence: Option<u8>,
    pub cves_found: usize,
    pub vulnerabilities_created: usize,
    /// Correlated CVE ids, capped for display
    pub cve_ids: Vec<String>,
    pub from_cache: bool,
    pub error: Option<String>,
}

impl CorrelationResult {
    fn new(service_id: Uuid, status: CorrelationStatus) -> Self {
        Self {
            service_id,
            status,
            cpe: None,
            cpe_confidence: None,
            cves_found: 0,
            vulnerabilities_created: 0,
            cve_ids: Vec::new(),
            from_cache: false,
            error: None,
        }
    }

    fn with_cpe(mut self, cpe: &CpeMatch) -> Self {
        self.cpe = Some(cpe.cpe.clone());
        self.cpe_confidence = Some(cpe.confidence);
        self
    }

    fn failed(mut self, error: impl std::fmt::Display) -> Self {
        self.status = CorrelationStatus::Error;
        self.error = Some(error.to_string());
        self
    }
}

/// Totals over every service a scan touched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanCorrelation {
    pub scan_id: Uuid,
    pub status: CorrelationStatus,
    pub services_processed: usize,
    pub services_matched: usize,
    pub cves_found: usize,
    pub vulnerabilities_created: usize,
    pub errors: usize,
    pub results: Vec<CorrelationResult>,
}

impl ScanCorrelation {
    fn new(scan_id: Uuid) -> Self {
        Self {
            scan_id,
            status: CorrelationStatus::NoCpe,
            services_processed: 0,
            services_matched: 0,
            cves_found: 0,
            vulnerabilities_created: 0,
            errors: 0,
            results: Vec::new(),
        }
    }

    fn add(&mut self, result: CorrelationResult) {
        self.services_processed += 1;
        self.cves_found += result.cves_found;
        self.vulnerabilities_created += result.vulnerabilities_created;
        match result.status {
            CorrelationStatus::Success => self.services_matched += 1,
            CorrelationStatus::Error => self.errors += 1,
            _ => {}
        }
        self.results.push(result);
    }

    /// Success if any service matched, otherwise the most telling of the rest
    fn settle(&mut self) {
        let any = |status| self.results.iter().any(|r| r.status == status);
        self.status = if any(CorrelationStatus::Success) {
            CorrelationStatus::Success
        } else if self.errors > 0 {
            CorrelationStatus::Error
        } else if any(CorrelationStatus::NoCves) {
            CorrelationStatus::NoCves
        } else {
            CorrelationStatus::NoCpe
        };
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationSettings {
    /// Cache entries older than this are ignored
    pub cache_ttl: Duration,
    /// How many CVE ids a result lists
    pub display_cap: usize,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(7 * 24 * 3600),
            display_cap: 10,
        }
    }
}

pub struct CorrelationEngine {
    store: Arc<dyn Store>,
    source: Arc<dyn CveSource>,
    resilience: Resilience,
    settings: CorrelationSettings,
}

impl CorrelationEngine {
    pub fn new(store: Arc<dyn Store>, source: Arc<dyn CveSource>, resilience: Resilience) -> Self {
        Self {
            store,
            source,
            resilience,
            settings: CorrelationSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: CorrelationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Correlate one stored service. Only an unknown service id is an error.
    pub async fn correlate_service(
        &self,
        service_id: Uuid,
        options: &CorrelationOptions,
    ) -> ScannerResult<CorrelationResult> {
        let service = self
            .store
            .get_service(service_id)
            .await?
            .ok_or_else(|| ScannerError::NotFound {
                entity: "service",
                id: service_id.to_string(),
            })?;

        Ok(self.correlate(&service, options).await)
    }

    /// Correlate every service on every asset the scan touched. One failing
    /// service never stops the rest.
    pub async fn correlate_scan(&self, scan_id: Uuid, options: &CorrelationOptions) -> ScannerResult<ScanCorrelation> {
        if self.store.get_scan(scan_id).await?.is_none() {
            return Err(ScannerError::NotFound {
                entity: "scan",
                id: scan_id.to_string(),
            });
        }

        let mut summary = ScanCorrelation::new(scan_id);

        for asset_id in self.store.scan_asset_ids(scan_id).await? {
            let services = match self.store.services_for_asset(asset_id).await {
                Ok(services) => services,
                Err(e) => {
                    warn!(scan_id = %scan_id, asset_id = %asset_id, error = %e, "Failed to load services");
                    summary.errors += 1;
                    continue;
                }
            };

            for service in services {
                let result = self.correlate(&service, options).await;
                summary.add(result);
            }
        }

        summary.settle();
        info!(
            scan_id = %scan_id,
            services = summary.services_processed,
            matched = summary.services_matched,
            cves = summary.cves_found,
            created = summary.vulnerabilities_created,
            errors = summary.errors,
            "Scan correlation finished"
        );
        Ok(summary)
    }

    async fn correlate(&self, service: &Service, options: &CorrelationOptions) -> CorrelationResult {
        let Some(cpe) = build_cpe(service) else {
            debug!(service_id = %service.id, "No CPE for service");
            return CorrelationResult::new(service.id, CorrelationStatus::NoCpe);
        };
        let result = CorrelationResult::new(service.id, CorrelationStatus::Success).with_cpe(&cpe);

        let (mut cves, from_cache) = match self.lookup(&cpe).await {
            Ok(found) => found,
            Err(e) => {
                warn!(service_id = %service.id, cpe = %cpe.cpe, error = %e, "CVE lookup failed");
                return result.failed(e);
            }
        };

        if let Some(min) = options.min_cvss {
            cves.retain(|c| c.cvss_v3_score.is_some_and(|s| s >= min));
        }
        cves.sort_by(|a, b| {
            b.cvss_v3_score
                .unwrap_or(0.0)
                .total_cmp(&a.cvss_v3_score.unwrap_or(0.0))
                .then_with(|| a.cve_id.cmp(&b.cve_id))
        });

        let mut result = result;
        result.from_cache = from_cache;
        result.cves_found = cves.len();
        result.cve_ids = cves
            .iter()
            .take(self.settings.display_cap)
            .map(|c| c.cve_id.clone())
            .collect();

        if cves.is_empty() {
            result.status = CorrelationStatus::NoCves;
            return result;
        }

        if options.auto_create {
            match self.materialize(service, &cpe, &cves[..cves.len().min(options.max_cves)]).await {
                Ok(created) => result.vulnerabilities_created = created,
                Err(e) => {
                    warn!(service_id = %service.id, error = %e, "Failed to create vulnerabilities");
                    return result.failed(e);
                }
            }
        }

        info!(
            service_id = %service.id,
            cpe = %cpe.cpe,
            cves = result.cves_found,
            created = result.vulnerabilities_created,
            from_cache = from_cache,
            "Service correlated"
        );
        result
    }

    /// Fresh cache entries for the product, else the CVE API through the
    /// resilience layer. API results refresh the cache.
    async fn lookup(&self, cpe: &CpeMatch) -> ScannerResult<(Vec<CveCacheEntry>, bool)> {
        let ttl = chrono::Duration::from_std(self.settings.cache_ttl).unwrap_or(chrono::Duration::days(7));
        let fresh_since = Utc::now() - ttl;

        let cached = self
            .store
            .find_cves_for_product(&cpe.vendor, &cpe.product, fresh_since)
            .await?;
        if !cached.is_empty() {
            debug!(cpe = %cpe.cpe, count = cached.len(), "CVE cache hit");
            return Ok((cached, true));
        }

        let operation = format!("cve lookup {}", cpe.cpe);
        let fetched = self
            .resilience
            .execute(Dependency::Nvd, &operation, || self.source.fetch_by_cpe(cpe))
            .await?;

        for entry in &fetched {
            if let Err(e) = self.store.upsert_cve(entry).await {
                warn!(cve_id = %entry.cve_id, error = %e, "Failed to cache CVE");
            }
        }
        Ok((fetched, false))
    }

    async fn materialize(&self, service: &Service, cpe: &CpeMatch, cves: &[CveCacheEntry]) -> ScannerResult<usize> {
        let asset = self
            .store
            .get_asset(service.asset_id)
            .await?
            .ok_or_else(|| ScannerError::NotFound {
                entity: "asset",
                id: service.asset_id.to_string(),
            })?;

        let mut created = 0;
        for cve in cves {
            let severity = Severity::from_cvss(cve.cvss_v3_severity.as_deref(), cve.cvss_v3_score);
            let title = match &cpe.version {
                Some(v) => format!("{} in {} {}", cve.cve_id, cpe.product, v),
                None => format!("{} in {}", cve.cve_id, cpe.product),
            };

            let mut vulnerability = Vulnerability::new(asset.organization_id, asset.id, title, severity);
            vulnerability.service_id = Some(service.id);
            vulnerability.cve_id = Some(cve.cve_id.clone());
            vulnerability.description = cve.description.clone();
            vulnerability.cvss_score = cve.cvss_v3_score;
            vulnerability.auto_created = true;

            if self.store.create_vulnerability_if_absent(&vulnerability).await? {
                created += 1;
            } else {
                debug!(service_id = %service.id, cve_id = %cve.cve_id, "Vulnerability already recorded");
            }
        }
        Ok(created)
    }
}
