// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Service
 * Entry points used by the API layer: scan lifecycle, correlation and
 * target pre-validation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::circuit_breaker::{CircuitSnapshot, Dependency};
use crate::correlation::{CorrelationEngine, CorrelationOptions, CorrelationResult, ScanCorrelation};
use crate::errors::ScannerResult;
use crate::orchestrator::{ScanOrchestrator, ScanRequest};
use crate::types::{Scan, ScanOptions, ScanStatus, ScanType};
use crate::validation::{describe, TargetValidation};

/// What status pollers see of a scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatusView {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub hosts_found: u32,
    pub services_found: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Scan> for ScanStatusView {
    fn from(scan: &Scan) -> Self {
        Self {
            scan_id: scan.id,
            status: scan.status(),
            progress: scan.progress(),
            current_stage: scan.current_stage().map(str::to_string),
            error: scan.error().map(str::to_string),
            hosts_found: scan.hosts_found(),
            services_found: scan.services_found(),
            started_at: scan.started_at(),
            completed_at: scan.completed_at(),
        }
    }
}

#[derive(Clone)]
pub struct ScanService {
    orchestrator: Arc<ScanOrchestrator>,
    correlation: Arc<CorrelationEngine>,
}

impl ScanService {
    pub fn new(orchestrator: Arc<ScanOrchestrator>, correlation: Arc<CorrelationEngine>) -> Self {
        Self {
            orchestrator,
            correlation,
        }
    }

    /// Validate targets and enqueue a scan. Returns the new scan's id.
    pub async fn create_scan(
        &self,
        organization_id: Uuid,
        scan_type: ScanType,
        targets: Vec<String>,
        auto_correlate: bool,
    ) -> ScannerResult<Uuid> {
        let request = ScanRequest::new(organization_id, scan_type, targets).with_auto_correlate(auto_correlate);
        Ok(self.orchestrator.create(request).await?.id)
    }

    /// Like `create_scan` with explicit per-type options
    pub async fn create_scan_with_options(
        &self,
        organization_id: Uuid,
        scan_type: ScanType,
        targets: Vec<String>,
        options: ScanOptions,
        auto_correlate: bool,
    ) -> ScannerResult<Uuid> {
        let request = ScanRequest::new(organization_id, scan_type, targets)
            .with_options(options)
            .with_auto_correlate(auto_correlate);
        Ok(self.orchestrator.create(request).await?.id)
    }

    pub async fn get_scan_status(&self, scan_id: Uuid) -> ScannerResult<ScanStatusView> {
        let scan = self.orchestrator.get_status(scan_id).await?;
        Ok(ScanStatusView::from(&scan))
    }

    /// Fails with `AlreadyTerminal` for a finished scan
    pub async fn cancel_scan(&self, scan_id: Uuid) -> ScannerResult<()> {
        self.orchestrator.cancel(scan_id).await?;
        Ok(())
    }

    pub async fn correlate_service(
        &self,
        service_id: Uuid,
        options: &CorrelationOptions,
    ) -> ScannerResult<CorrelationResult> {
        self.correlation.correlate_service(service_id, options).await
    }

    pub async fn correlate_scan(&self, scan_id: Uuid, options: &CorrelationOptions) -> ScannerResult<ScanCorrelation> {
        self.correlation.correlate_scan(scan_id, options).await
    }

    pub fn validate_target(&self, target: &str) -> TargetValidation {
        describe(target)
    }

    pub async fn breaker_status(&self) -> Vec<CircuitSnapshot> {
        self.orchestrator.resilience().snapshot().await
    }

    /// Force a dependency's breaker back to CLOSED
    pub async fn reset_breaker(&self, dependency: Dependency) {
        self.orchestrator.resilience().breakers().reset(dependency).await;
    }
}
