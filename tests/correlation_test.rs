// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Correlation Tests
 * Scan results through CPE building, CVE lookup and vulnerability creation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use common::{discovery, fast_settings, Harness, Script, ScriptedNmap};
use vulnmgr_core::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, Dependency};
use vulnmgr_core::correlation::{CorrelationEngine, CorrelationOptions, CorrelationStatus, CpeMatch, CveSource};
use vulnmgr_core::database::{cve_entry, Store};
use vulnmgr_core::errors::{ScannerError, ScannerResult};
use vulnmgr_core::orchestrator::DispatchOutcome;
use vulnmgr_core::resilience::Resilience;
use vulnmgr_core::retry::RetryConfig;
use vulnmgr_core::types::{CveCacheEntry, ScanStatus, Severity};

struct StubSource {
    calls: AtomicU32,
    entries: Vec<CveCacheEntry>,
}

impl StubSource {
    fn apache() -> Self {
        Self {
            calls: AtomicU32::new(0),
            entries: vec![
                cve_entry("CVE-2021-41773", "apache", "http_server", Some(7.5)),
                cve_entry("CVE-2021-42013", "apache", "http_server", Some(9.8)),
            ],
        }
    }
}

#[async_trait]
impl CveSource for StubSource {
    async fn fetch_by_cpe(&self, _cpe: &CpeMatch) -> ScannerResult<Vec<CveCacheEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.clone())
    }
}

struct DownSource {
    calls: AtomicU32,
}

#[async_trait]
impl CveSource for DownSource {
    async fn fetch_by_cpe(&self, _cpe: &CpeMatch) -> ScannerResult<Vec<CveCacheEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ScannerError::Network {
            url: "https://cve.invalid".to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

fn resilience(failure_threshold: u32) -> Resilience {
    let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold,
        ..CircuitBreakerConfig::default()
    });
    Resilience::new(Arc::new(breakers), RetryConfig::no_retry())
}

/// Completed scan of one host running Apache httpd 2.4.49
async fn completed_scan(h: &Harness) -> Uuid {
    let scan = h.orchestrator.create(discovery(&["10.0.0.5"])).await.unwrap();
    let outcome = h.orchestrator.dispatch(scan.id).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Completed { services_found: 1, .. }));
    scan.id
}

async fn only_service(h: &Harness, scan_id: Uuid) -> Uuid {
    let assets = h.store.scan_asset_ids(scan_id).await.unwrap();
    let services = h.store.services_for_asset(assets[0]).await.unwrap();
    services[0].id
}

#[tokio::test]
async fn test_apache_service_correlates_to_vulnerabilities() {
    let h = Harness::new(Arc::new(ScriptedNmap::new(Script::Progress(vec![]))), fast_settings());
    let scan_id = completed_scan(&h).await;
    let service_id = only_service(&h, scan_id).await;

    let source = Arc::new(StubSource::apache());
    let engine = CorrelationEngine::new(h.store.clone(), source.clone(), resilience(5));

    let result = engine
        .correlate_service(service_id, &CorrelationOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, CorrelationStatus::Success);
    assert_eq!(result.cpe.as_deref(), Some("cpe:/a:apache:http_server:2.4.49"));
    assert!(result.cpe_confidence.unwrap() >= 70);
    assert_eq!(result.cves_found, 2);
    assert_eq!(result.vulnerabilities_created, 2);
    // Highest score first
    assert_eq!(result.cve_ids, vec!["CVE-2021-42013", "CVE-2021-41773"]);

    let vulns = h.store.vulnerabilities_for_service(service_id).await.unwrap();
    assert_eq!(vulns.len(), 2);
    let critical = vulns
        .iter()
        .find(|v| v.cve_id.as_deref() == Some("CVE-2021-42013"))
        .unwrap();
    assert_eq!(critical.severity, Severity::Critical);
    assert_eq!(critical.title, "CVE-2021-42013 in http_server 2.4.49");
}

#[tokio::test]
async fn test_correlating_twice_creates_one_vulnerability_per_cve() {
    let h = Harness::new(Arc::new(ScriptedNmap::new(Script::Progress(vec![]))), fast_settings());
    let scan_id = completed_scan(&h).await;
    let service_id = only_service(&h, scan_id).await;

    let source = Arc::new(StubSource::apache());
    let engine = Arc::new(CorrelationEngine::new(h.store.clone(), source.clone(), resilience(5)));
    let options = CorrelationOptions::default();

    // Auto-correlation racing a manual request
    let (a, b) = tokio::join!(
        engine.correlate_service(service_id, &options),
        engine.correlate_scan(scan_id, &options)
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.vulnerabilities_created + b.vulnerabilities_created, 2);

    let again = engine.correlate_service(service_id, &options).await.unwrap();
    assert_eq!(again.status, CorrelationStatus::Success);
    assert_eq!(again.vulnerabilities_created, 0);
    assert!(again.from_cache);

    assert_eq!(h.store.vulnerabilities_for_service(service_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_open_breaker_short_circuits_cve_lookups() {
    let h = Harness::new(Arc::new(ScriptedNmap::new(Script::Progress(vec![]))), fast_settings());
    let scan_id = completed_scan(&h).await;
    let service_id = only_service(&h, scan_id).await;

    let source = Arc::new(DownSource {
        calls: AtomicU32::new(0),
    });
    let resilience = resilience(5);
    let engine = CorrelationEngine::new(h.store.clone(), source.clone(), resilience.clone());
    let options = CorrelationOptions::default();

    for _ in 0..5 {
        let result = engine.correlate_service(service_id, &options).await.unwrap();
        assert_eq!(result.status, CorrelationStatus::Error);
    }
    assert_eq!(source.calls.load(Ordering::SeqCst), 5);

    let nvd = resilience.breakers().get(Dependency::Nvd).snapshot().await;
    assert_eq!(nvd.state, CircuitState::Open);

    let sixth = engine.correlate_service(service_id, &options).await.unwrap();
    assert_eq!(sixth.status, CorrelationStatus::Error);
    assert!(sixth.error.unwrap().to_lowercase().contains("circuit"));
    assert_eq!(source.calls.load(Ordering::SeqCst), 5);

    // The scan that produced the service is untouched
    let scan = h.orchestrator.get_status(scan_id).await.unwrap();
    assert_eq!(scan.status(), ScanStatus::Completed);
    assert!(h.store.vulnerabilities_for_service(service_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scan_correlation_reports_error_without_aborting() {
    let h = Harness::new(Arc::new(ScriptedNmap::new(Script::Progress(vec![]))), fast_settings());
    let scan = h
        .orchestrator
        .create(discovery(&["10.0.0.5", "10.0.0.6"]))
        .await
        .unwrap();
    h.orchestrator.dispatch(scan.id).await.unwrap();

    let source = Arc::new(DownSource {
        calls: AtomicU32::new(0),
    });
    let engine = CorrelationEngine::new(h.store.clone(), source.clone(), resilience(5));

    let summary = engine
        .correlate_scan(scan.id, &CorrelationOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.services_processed, 2);
    assert_eq!(summary.errors, 2);
    assert_eq!(summary.status, CorrelationStatus::Error);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let h = Harness::new(Arc::new(ScriptedNmap::new(Script::Progress(vec![]))), fast_settings());
    let engine = CorrelationEngine::new(h.store.clone(), Arc::new(StubSource::apache()), resilience(5));
    let options = CorrelationOptions::default();

    assert!(matches!(
        engine.correlate_service(Uuid::new_v4(), &options).await,
        Err(ScannerError::NotFound { entity: "service", .. })
    ));
    assert!(matches!(
        engine.correlate_scan(Uuid::new_v4(), &options).await,
        Err(ScannerError::NotFound { entity: "scan", .. })
    ));
}
