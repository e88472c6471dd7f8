// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Scan Worker Pool
 * Pulls scan jobs from the queue, dispatches them through the orchestrator
 * and runs CVE correlation for scans that asked for it
 *
 * © 2026 Bountyy Oy
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::correlation::{CorrelationEngine, CorrelationOptions};
use crate::orchestrator::{DispatchOutcome, ScanOrchestrator};
use crate::queue::JobQueue;
use crate::types::ScanJob;

/// Pause after a failed queue pop before trying again
const POP_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Counters since the pool started
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerMetrics {
    pub active_scans: usize,
    pub completed_scans: u64,
    pub failed_scans: u64,
    pub cancelled_scans: u64,
    pub skipped_jobs: u64,
    pub correlations_run: u64,
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    skipped: AtomicU64,
    correlations: AtomicU64,
}

/// Auto-correlation hook run after a scan completes
struct AutoCorrelation {
    engine: Arc<CorrelationEngine>,
    options: CorrelationOptions,
}

pub struct WorkerPool {
    config: WorkerConfig,
    orchestrator: Arc<ScanOrchestrator>,
    queue: Arc<dyn JobQueue>,
    correlation: Option<Arc<AutoCorrelation>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig, orchestrator: Arc<ScanOrchestrator>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            config,
            orchestrator,
            queue,
            correlation: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Correlate completed scans created with `auto_correlate`
    pub fn with_correlation(mut self, engine: Arc<CorrelationEngine>, options: CorrelationOptions) -> Self {
        self.correlation = Some(Arc::new(AutoCorrelation { engine, options }));
        self
    }

    pub fn metrics(&self) -> WorkerMetrics {
        let c = &self.counters;
        WorkerMetrics {
            active_scans: c.active.load(Ordering::Relaxed),
            completed_scans: c.completed.load(Ordering::Relaxed),
            failed_scans: c.failed.load(Ordering::Relaxed),
            cancelled_scans: c.cancelled.load(Ordering::Relaxed),
            skipped_jobs: c.skipped.load(Ordering::Relaxed),
            correlations_run: c.correlations.load(Ordering::Relaxed),
        }
    }

    /// Consume jobs until `shutdown` fires, then wait for in-flight scans
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerMetrics {
        let capacity = self.config.workers.max(1);
        let permits = Arc::new(Semaphore::new(capacity));
        let poll_timeout = Duration::from_secs(self.config.poll_timeout_secs);
        let mut tasks: JoinSet<()> = JoinSet::new();

        info!(workers = capacity, "Worker pool started");

        loop {
            // Reap finished tasks so the set does not grow unbounded
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!("Scan task panicked: {}", e);
                }
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let popped = tokio::select! {
                _ = shutdown.cancelled() => break,
                popped = self.queue.pop(poll_timeout) => popped,
            };

            let job = match popped {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Failed to pop scan job: {}", e);
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(POP_ERROR_BACKOFF) => continue,
                    }
                }
            };

            info!(job_id = %job.job_id, scan_id = %job.scan_id, scanner = %job.scanner, "Received job");

            let orchestrator = Arc::clone(&self.orchestrator);
            let correlation = self.correlation.clone();
            let counters = Arc::clone(&self.counters);
            tasks.spawn(async move {
                counters.active.fetch_add(1, Ordering::Relaxed);
                execute_job(orchestrator, correlation, &counters, job).await;
                counters.active.fetch_sub(1, Ordering::Relaxed);
                drop(permit);
            });
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight = in_flight, "Shutdown requested, waiting for in-flight scans");
            let drain = async {
                while let Some(joined) = tasks.join_next().await {
                    if let Err(e) = joined {
                        error!("Scan task panicked: {}", e);
                    }
                }
            };
            let grace = Duration::from_secs(self.config.shutdown_timeout_secs);
            if tokio::time::timeout(grace, drain).await.is_err() {
                warn!(remaining = tasks.len(), "Shutdown timeout reached, aborting remaining scans");
                tasks.abort_all();
            }
        }

        let metrics = self.metrics();
        info!(
            completed = metrics.completed_scans,
            failed = metrics.failed_scans,
            cancelled = metrics.cancelled_scans,
            "Worker pool stopped"
        );
        metrics
    }
}

async fn execute_job(
    orchestrator: Arc<ScanOrchestrator>,
    correlation: Option<Arc<AutoCorrelation>>,
    counters: &Counters,
    job: ScanJob,
) {
    let outcome = match orchestrator.dispatch(job.scan_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(job_id = %job.job_id, scan_id = %job.scan_id, "Dispatch failed: {}", e);
            counters.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    match &outcome {
        DispatchOutcome::Completed { hosts_found, services_found } => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            info!(
                scan_id = %job.scan_id,
                hosts = hosts_found,
                services = services_found,
                "Scan completed"
            );
        }
        DispatchOutcome::Failed { error } => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(scan_id = %job.scan_id, error = %error, "Scan failed");
        }
        DispatchOutcome::Cancelled => {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
            info!(scan_id = %job.scan_id, "Scan cancelled");
        }
        DispatchOutcome::Skipped { status } => {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(scan_id = %job.scan_id, status = %status, "Job skipped");
        }
    }

    if !matches!(outcome, DispatchOutcome::Completed { .. }) {
        return;
    }
    let Some(correlation) = correlation else {
        return;
    };

    let auto_correlate = match orchestrator.get_status(job.scan_id).await {
        Ok(scan) => scan.auto_correlate,
        Err(e) => {
            warn!(scan_id = %job.scan_id, "Could not reload scan for correlation: {}", e);
            false
        }
    };
    if !auto_correlate {
        return;
    }

    // Correlation problems never change the scan's outcome
    match correlation.engine.correlate_scan(job.scan_id, &correlation.options).await {
        Ok(summary) => {
            counters.correlations.fetch_add(1, Ordering::Relaxed);
            info!(
                scan_id = %job.scan_id,
                status = ?summary.status,
                services = summary.services_processed,
                cves = summary.cves_found,
                created = summary.vulnerabilities_created,
                "Scan correlated"
            );
        }
        Err(e) => error!(scan_id = %job.scan_id, "Auto-correlation failed: {}", e),
    }
}
