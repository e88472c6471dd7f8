// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Orchestrator
 * Creates scans, drives them through the scanner adapters and owns every
 * status change of the Scan entity
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state_machine;
use crate::database::Store;
use crate::errors::{ScannerError, ScannerResult};
use crate::queue::JobQueue;
use crate::registry::ScannerRegistry;
use crate::resilience::Resilience;
use crate::scanners::{ProgressSink, ProgressUpdate, ScanContext, ScannerAdapter};
use crate::types::{
    NormalizedResult, Scan, ScanJob, ScanOptions, ScanProgress, ScanStatus, ScanTarget, ScanType,
};
use crate::validation::validate_multiple;

/// Stage recorded when a scan fails because its engine's breaker is open
pub const SCANNER_UNAVAILABLE: &str = "scanner unavailable";

/// A request to create a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub organization_id: Uuid,
    pub scan_type: ScanType,
    pub targets: Vec<String>,
    /// Defaults for the scan type when absent
    #[serde(default)]
    pub options: Option<ScanOptions>,
    #[serde(default)]
    pub auto_correlate: bool,
}

impl ScanRequest {
    pub fn new(organization_id: Uuid, scan_type: ScanType, targets: Vec<String>) -> Self {
        Self {
            organization_id,
            scan_type,
            targets,
            options: None,
            auto_correlate: false,
        }
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_auto_correlate(mut self, auto_correlate: bool) -> Self {
        self.auto_correlate = auto_correlate;
        self
    }
}

/// How a dispatch ended
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed { hosts_found: u32, services_found: u32 },
    Failed { error: String },
    Cancelled,
    /// The scan was not PENDING when the job was picked up
    Skipped { status: ScanStatus },
}

/// Timing knobs for dispatch
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Hard bound on one scan's adapter work, across all targets and retries
    pub scan_timeout: Duration,
    /// Bound on a single engine invocation
    pub engine_timeout: Duration,
    /// How often the queue's cancellation flag is checked while running
    pub cancel_poll_interval: Duration,
    /// How long a cancelled or timed-out run may take to wind down
    pub cancel_grace: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(3600),
            engine_timeout: Duration::from_secs(1800),
            cancel_poll_interval: Duration::from_secs(2),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

enum RunEnd {
    Finished(ScannerResult<NormalizedResult>),
    TimedOut,
    Cancelled,
}

pub struct ScanOrchestrator {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    registry: Arc<ScannerRegistry>,
    resilience: Resilience,
    settings: OrchestratorSettings,
    running: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl ScanOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        registry: Arc<ScannerRegistry>,
        resilience: Resilience,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            resilience,
            settings: OrchestratorSettings::default(),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn resilience(&self) -> &Resilience {
        &self.resilience
    }

    /// Validate, persist a PENDING scan and enqueue its job
    pub async fn create(&self, request: ScanRequest) -> ScannerResult<Scan> {
        let targets = validate_multiple(&request.targets)?;

        let options = request
            .options
            .unwrap_or_else(|| ScanOptions::default_for(request.scan_type));
        options.check_matches(request.scan_type)?;

        let scanner = self.registry.select(request.scan_type, &options).await?;

        let mut scan = Scan::new(
            request.organization_id,
            request.scan_type,
            targets,
            options,
            request.auto_correlate,
        );
        let job_id = Uuid::new_v4().to_string();
        scan.scanner = Some(scanner);
        scan.external_job_id = Some(job_id.clone());

        self.store.insert_scan(&scan).await?;

        let job = ScanJob {
            job_id,
            scan_id: scan.id,
            organization_id: scan.organization_id,
            scan_type: scan.scan_type,
            scanner,
            enqueued_at: chrono::Utc::now(),
        };
        self.queue.push(&job).await?;
        self.mirror_status(&scan).await;

        info!(
            scan_id = %scan.id,
            scan_type = %scan.scan_type,
            scanner = %scanner,
            targets = scan.targets.len(),
            "Scan created"
        );
        Ok(scan)
    }

    pub async fn get_status(&self, scan_id: Uuid) -> ScannerResult<Scan> {
        self.load(scan_id).await
    }

    /// Cancel a QUEUED or RUNNING scan. The engine is signalled best-effort
    /// and the scan is CANCELLED in storage without waiting for it.
    pub async fn cancel(&self, scan_id: Uuid) -> ScannerResult<Scan> {
        let mut signalled = false;
        loop {
            let scan = self.load(scan_id).await?;
            // The dispatching worker may settle the scan itself once signalled
            if signalled && scan.status == ScanStatus::Cancelled {
                return Ok(scan);
            }
            let mut next = scan.clone();
            state_machine::cancel(&mut next)?;

            if let Some(job_id) = &scan.external_job_id {
                if let Err(e) = self.queue.request_cancel(job_id).await {
                    warn!(scan_id = %scan_id, error = %e, "Failed to flag job cancellation");
                }
            }
            if let Some(token) = self.running.lock().get(&scan_id) {
                token.cancel();
            }
            signalled = true;

            if self.transition(&next, scan.status).await? {
                info!(scan_id = %scan_id, from = %scan.status, "Scan cancelled");
                return Ok(next);
            }
            debug!(scan_id = %scan_id, "Scan status moved during cancel, re-reading");
        }
    }

    /// Worker side: run a PENDING scan to a terminal status
    pub async fn dispatch(&self, scan_id: Uuid) -> ScannerResult<DispatchOutcome> {
        let scan = self.load(scan_id).await?;
        if scan.status != ScanStatus::Pending {
            debug!(scan_id = %scan_id, status = %scan.status, "Scan not pending, skipping dispatch");
            return Ok(DispatchOutcome::Skipped { status: scan.status });
        }

        let token = CancellationToken::new();
        self.running.lock().insert(scan_id, token.clone());

        let outcome = self.drive(scan, token).await;

        self.running.lock().remove(&scan_id);
        outcome
    }

    async fn drive(&self, scan: Scan, token: CancellationToken) -> ScannerResult<DispatchOutcome> {
        let mut queued = scan.clone();
        state_machine::enqueue(&mut queued)?;
        if !self.transition(&queued, ScanStatus::Pending).await? {
            return self.settled(scan.id).await;
        }

        let mut running = queued.clone();
        state_machine::start(&mut running)?;
        if !self.transition(&running, ScanStatus::Queued).await? {
            return self.settled(scan.id).await;
        }
        let mut scan = running;

        // Targets were validated at creation; check again right before the engine runs
        let raw: Vec<&str> = scan.targets.iter().map(ScanTarget::as_str).collect();
        let targets = match validate_multiple(&raw) {
            Ok(targets) => targets,
            Err(e) => return self.finish_failed(&scan, e.to_string()).await,
        };

        let adapter = match scan.scanner.and_then(|kind| self.registry.get(kind)) {
            Some(adapter) => adapter,
            None => {
                let err = ScannerError::NoScannerAvailable(scan.scan_type);
                return self.finish_failed(&scan, err.to_string()).await;
            }
        };

        info!(
            scan_id = %scan.id,
            scanner = %adapter.kind(),
            targets = targets.len(),
            "Scan running"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
        let ctx = ScanContext::new(
            scan.id,
            ProgressSink::new(tx),
            token.clone(),
            self.settings.engine_timeout,
        );

        let run = run_targets(
            self.resilience.clone(),
            adapter,
            targets,
            scan.scan_type,
            scan.options.clone(),
            ctx,
        );
        tokio::pin!(run);

        let deadline = tokio::time::sleep(self.settings.scan_timeout);
        tokio::pin!(deadline);
        let mut cancel_poll = tokio::time::interval(self.settings.cancel_poll_interval);
        let job_id = scan.external_job_id.clone();

        let end = loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break RunEnd::Cancelled,
                _ = &mut deadline => break RunEnd::TimedOut,
                Some(update) = rx.recv() => {
                    self.apply_progress(&mut scan, update, &token).await;
                }
                result = &mut run => break RunEnd::Finished(result),
                _ = cancel_poll.tick() => {
                    if let Some(job_id) = &job_id {
                        match self.queue.is_cancel_requested(job_id).await {
                            Ok(true) => token.cancel(),
                            Ok(false) => {}
                            Err(e) => debug!(scan_id = %scan.id, error = %e, "Cancellation flag check failed"),
                        }
                    }
                }
            }
        };

        match end {
            RunEnd::Finished(result) => {
                while let Ok(update) = rx.try_recv() {
                    self.apply_progress(&mut scan, update, &token).await;
                }
                if token.is_cancelled() {
                    debug!(scan_id = %scan.id, "Discarding result of cancelled scan");
                    return self.finish_cancelled(&scan).await;
                }
                match result {
                    Ok(result) => self.finish_completed(&scan, result).await,
                    Err(ScannerError::Cancelled(_)) => self.finish_cancelled(&scan).await,
                    Err(e) if e.is_circuit_open() => {
                        warn!(scan_id = %scan.id, error = %e, "Scanner circuit open");
                        self.finish_failed(&scan, SCANNER_UNAVAILABLE.to_string()).await
                    }
                    Err(e) => self.finish_failed(&scan, e.to_string()).await,
                }
            }
            RunEnd::TimedOut => {
                token.cancel();
                let _ = tokio::time::timeout(self.settings.cancel_grace, &mut run).await;
                let message = format!("scan timed out after {}s", self.settings.scan_timeout.as_secs());
                self.finish_failed(&scan, message).await
            }
            RunEnd::Cancelled => {
                // Let the engine observe the token; whatever it returns is discarded
                let _ = tokio::time::timeout(self.settings.cancel_grace, &mut run).await;
                self.finish_cancelled(&scan).await
            }
        }
    }

    async fn apply_progress(&self, scan: &mut Scan, update: ProgressUpdate, token: &CancellationToken) {
        let mut next = scan.clone();
        match state_machine::record_progress(&mut next, update.percent, update.stage.as_deref()) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                debug!(scan_id = %scan.id, error = %e, "Progress update rejected");
                return;
            }
        }

        match self.store.update_scan_if_status(&next, ScanStatus::Running).await {
            Ok(true) => {
                *scan = next;
                let progress = ScanProgress {
                    scan_id: scan.id,
                    progress: scan.progress(),
                    stage: scan.current_stage().map(str::to_string),
                };
                if let Err(e) = self.queue.publish_progress(&progress).await {
                    debug!(scan_id = %scan.id, error = %e, "Failed to publish progress");
                }
            }
            Ok(false) => {
                // Someone else moved the scan out of RUNNING
                token.cancel();
            }
            Err(e) => warn!(scan_id = %scan.id, error = %e, "Failed to persist progress"),
        }
    }

    async fn finish_completed(&self, scan: &Scan, result: NormalizedResult) -> ScannerResult<DispatchOutcome> {
        let (hosts_found, services_found) = result.summary_counts();
        let mut next = scan.clone();
        state_machine::complete(&mut next, hosts_found, services_found)?;

        // Result and status land together or not at all
        match self.store.complete_scan(&next, &result).await {
            Ok(true) => self.mirror_status(&next).await,
            Ok(false) => {
                debug!(scan_id = %scan.id, "Discarding late result");
                return self.settled(scan.id).await;
            }
            Err(e) => {
                error!(scan_id = %scan.id, error = %e, "Failed to persist scan result");
                return self
                    .finish_failed(scan, format!("failed to persist scan result: {}", e))
                    .await;
            }
        }

        info!(
            scan_id = %scan.id,
            hosts = hosts_found,
            services = services_found,
            findings = result.raw_findings.len(),
            "Scan completed"
        );
        Ok(DispatchOutcome::Completed {
            hosts_found,
            services_found,
        })
    }

    async fn finish_failed(&self, scan: &Scan, error: String) -> ScannerResult<DispatchOutcome> {
        let mut next = scan.clone();
        state_machine::fail(&mut next, error.clone())?;
        if !self.transition(&next, ScanStatus::Running).await? {
            return self.settled(scan.id).await;
        }

        warn!(scan_id = %scan.id, error = %error, "Scan failed");
        Ok(DispatchOutcome::Failed { error })
    }

    async fn finish_cancelled(&self, scan: &Scan) -> ScannerResult<DispatchOutcome> {
        let mut next = scan.clone();
        state_machine::cancel(&mut next)?;
        if !self.transition(&next, ScanStatus::Running).await? {
            return self.settled(scan.id).await;
        }
        info!(scan_id = %scan.id, "Scan cancelled by its job");
        Ok(DispatchOutcome::Cancelled)
    }

    /// Outcome for a scan another writer already settled
    async fn settled(&self, scan_id: Uuid) -> ScannerResult<DispatchOutcome> {
        let scan = self.load(scan_id).await?;
        Ok(match scan.status {
            ScanStatus::Cancelled => DispatchOutcome::Cancelled,
            ScanStatus::Failed => DispatchOutcome::Failed {
                error: scan.error().unwrap_or_default().to_string(),
            },
            ScanStatus::Completed => DispatchOutcome::Completed {
                hosts_found: scan.hosts_found(),
                services_found: scan.services_found(),
            },
            status => DispatchOutcome::Skipped { status },
        })
    }

    async fn transition(&self, next: &Scan, expected: ScanStatus) -> ScannerResult<bool> {
        let applied = self.store.update_scan_if_status(next, expected).await?;
        if applied {
            debug!(scan_id = %next.id, from = %expected, to = %next.status, "Scan transitioned");
            self.mirror_status(next).await;
        }
        Ok(applied)
    }

    async fn mirror_status(&self, scan: &Scan) {
        if let Err(e) = self.queue.update_scan_status(scan.id, scan.status).await {
            debug!(scan_id = %scan.id, error = %e, "Failed to mirror scan status");
        }
    }

    async fn load(&self, scan_id: Uuid) -> ScannerResult<Scan> {
        self.store
            .get_scan(scan_id)
            .await?
            .ok_or_else(|| ScannerError::NotFound {
                entity: "scan",
                id: scan_id.to_string(),
            })
    }
}

/// Scan the targets one after another, each engine call behind the
/// engine's breaker and retry policy
async fn run_targets(
    resilience: Resilience,
    adapter: Arc<dyn ScannerAdapter>,
    targets: Vec<ScanTarget>,
    scan_type: ScanType,
    options: ScanOptions,
    ctx: ScanContext,
) -> ScannerResult<NormalizedResult> {
    let dependency = adapter.kind().dependency();
    let total = targets.len();
    let mut merged = NormalizedResult::default();

    for (index, target) in targets.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            return Err(ScannerError::Cancelled(ctx.scan_id));
        }

        let target_ctx = ctx.for_target(index, total);
        let operation = format!("{} scan of {}", adapter.kind(), target);
        let adapter = &adapter;
        let options = &options;
        let target_ctx = &target_ctx;

        let result = resilience
            .execute(dependency, &operation, || {
                adapter.run(target, scan_type, options, target_ctx)
            })
            .await?;

        debug!(
            scan_id = %ctx.scan_id,
            target = %target,
            hosts = result.hosts.len(),
            services = result.services.len(),
            "Target scanned"
        );
        merged.merge(result);
    }

    merged.ensure_hosts_for_services();
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
    use crate::database::MemoryStore;
    use crate::errors::{EngineError, TargetError};
    use crate::queue::MemoryQueue;
    use crate::retry::RetryConfig;
    use crate::types::{DiscoveredHost, DiscoveredService, ScannerKind};
    use async_trait::async_trait;

    struct ScriptedNmap {
        fail: bool,
    }

    #[async_trait]
    impl ScannerAdapter for ScriptedNmap {
        fn kind(&self) -> ScannerKind {
            ScannerKind::Nmap
        }

        fn supports(&self, scan_type: ScanType) -> bool {
            scan_type.is_network_scan()
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn run(
            &self,
            target: &ScanTarget,
            _scan_type: ScanType,
            _options: &ScanOptions,
            ctx: &ScanContext,
        ) -> ScannerResult<NormalizedResult> {
            if self.fail {
                return Err(EngineError::Crashed {
                    engine: "nmap".to_string(),
                    code: Some(1),
                    stderr: "boom".to_string(),
                }
                .into());
            }
            ctx.progress.report(50.0, Some("Ping Scan"));
            let ip: IpAddr = target.network().ip();
            Ok(NormalizedResult {
                hosts: vec![DiscoveredHost { ip, hostname: None }],
                services: vec![DiscoveredService {
                    host_ip: ip,
                    port: 22,
                    protocol: "tcp".to_string(),
                    name: Some("ssh".to_string()),
                    product: Some("OpenSSH".to_string()),
                    version: Some("8.9p1".to_string()),
                    cpe: None,
                    confidence: 100,
                }],
                raw_findings: vec![],
            })
        }
    }

    fn orchestrator(fail: bool) -> (ScanOrchestrator, Arc<MemoryStore>, Arc<MemoryQueue>) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let mut registry = ScannerRegistry::new();
        registry.register(Arc::new(ScriptedNmap { fail }));

        let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        });
        let resilience = Resilience::new(Arc::new(breakers), RetryConfig::no_retry());

        let orch = ScanOrchestrator::new(store.clone(), queue.clone(), Arc::new(registry), resilience);
        (orch, store, queue)
    }

    fn discovery(targets: &[&str]) -> ScanRequest {
        ScanRequest::new(
            Uuid::new_v4(),
            ScanType::Discovery,
            targets.iter().map(|t| t.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_create_persists_pending_and_enqueues() {
        let (orch, _, queue) = orchestrator(false);
        let scan = orch.create(discovery(&["10.0.0.0/24"])).await.unwrap();

        assert_eq!(scan.status(), ScanStatus::Pending);
        assert_eq!(scan.scanner, Some(ScannerKind::Nmap));
        assert!(scan.external_job_id.is_some());
        assert_eq!(queue.len(), 1);
        assert_eq!(orch.get_status(scan.id).await.unwrap().status(), ScanStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_rejects_each_bad_target() {
        let (orch, _, queue) = orchestrator(false);
        let err = orch
            .create(discovery(&["10.0.0.1", "8.8.8.8", "example.com"]))
            .await
            .unwrap_err();

        match err {
            ScannerError::Validation(TargetError::Items(items)) => {
                let indexes: Vec<usize> = items.iter().map(|i| i.index).collect();
                assert_eq!(indexes, vec![2, 3]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_completes_and_persists_services() {
        let (orch, store, _) = orchestrator(false);
        let scan = orch.create(discovery(&["10.0.0.5"])).await.unwrap();

        let outcome = orch.dispatch(scan.id).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Completed {
                hosts_found: 1,
                services_found: 1
            }
        );

        let done = orch.get_status(scan.id).await.unwrap();
        assert_eq!(done.status(), ScanStatus::Completed);
        assert_eq!(done.progress(), 100);

        let assets = store.scan_asset_ids(scan.id).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(store.services_for_asset(assets[0]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_twice_is_skipped() {
        let (orch, _, _) = orchestrator(false);
        let scan = orch.create(discovery(&["10.0.0.5"])).await.unwrap();
        orch.dispatch(scan.id).await.unwrap();

        assert_eq!(
            orch.dispatch(scan.id).await.unwrap(),
            DispatchOutcome::Skipped {
                status: ScanStatus::Completed
            }
        );
    }

    #[tokio::test]
    async fn test_open_breaker_fails_as_unavailable() {
        let (orch, _, _) = orchestrator(true);

        let first = orch.create(discovery(&["10.0.0.5"])).await.unwrap();
        match orch.dispatch(first.id).await.unwrap() {
            DispatchOutcome::Failed { error } => assert!(error.contains("exited with status")),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let second = orch.create(discovery(&["10.0.0.6"])).await.unwrap();
        assert_eq!(
            orch.dispatch(second.id).await.unwrap(),
            DispatchOutcome::Failed {
                error: SCANNER_UNAVAILABLE.to_string()
            }
        );
        assert_eq!(orch.get_status(second.id).await.unwrap().error(), Some(SCANNER_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let (orch, _, _) = orchestrator(false);
        let scan = orch.create(discovery(&["10.0.0.5"])).await.unwrap();

        assert!(matches!(
            orch.cancel(scan.id).await,
            Err(ScannerError::InvalidTransition { .. })
        ));

        orch.dispatch(scan.id).await.unwrap();
        assert!(matches!(
            orch.cancel(scan.id).await,
            Err(ScannerError::AlreadyTerminal {
                status: ScanStatus::Completed,
                ..
            })
        ));
        assert!(matches!(
            orch.cancel(Uuid::new_v4()).await,
            Err(ScannerError::NotFound { .. })
        ));
    }
}
