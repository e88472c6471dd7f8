// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

#![allow(dead_code)]

/**
 * Bountyy Oy - Shared Test Harness
 * Scripted discovery engine and in-memory wiring for integration tests
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use vulnmgr_core::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use vulnmgr_core::database::MemoryStore;
use vulnmgr_core::errors::{ScannerError, ScannerResult};
use vulnmgr_core::orchestrator::{OrchestratorSettings, ScanOrchestrator, ScanRequest};
use vulnmgr_core::queue::MemoryQueue;
use vulnmgr_core::registry::ScannerRegistry;
use vulnmgr_core::resilience::Resilience;
use vulnmgr_core::retry::RetryConfig;
use vulnmgr_core::scanners::{ScanContext, ScannerAdapter};
use vulnmgr_core::types::{
    DiscoveredHost, DiscoveredService, NormalizedResult, ScanOptions, ScanStatus, ScanTarget, ScanType,
    ScannerKind,
};

/// What the scripted engine does when run
#[derive(Clone)]
pub enum Script {
    /// Report each (percent, stage) in order, then succeed
    Progress(Vec<(f32, &'static str)>),
    /// Ignore cancellation and succeed once `release` is notified
    SucceedAfter(Arc<Notify>),
    /// Run until cancelled
    Hang,
}

pub struct ScriptedNmap {
    script: Script,
    service: DiscoveredService,
    pub calls: AtomicUsize,
}

impl ScriptedNmap {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            service: apache_service("10.0.0.5".parse().unwrap()),
            calls: AtomicUsize::new(0),
        }
    }
}

pub fn apache_service(ip: IpAddr) -> DiscoveredService {
    DiscoveredService {
        host_ip: ip,
        port: 80,
        protocol: "tcp".to_string(),
        name: Some("http".to_string()),
        product: Some("Apache httpd".to_string()),
        version: Some("2.4.49".to_string()),
        cpe: None,
        confidence: 100,
    }
}

fn result_for(target: &ScanTarget, template: &DiscoveredService) -> NormalizedResult {
    let ip = target.network().ip();
    NormalizedResult {
        hosts: vec![DiscoveredHost { ip, hostname: None }],
        services: vec![DiscoveredService {
            host_ip: ip,
            ..template.clone()
        }],
        raw_findings: vec![],
    }
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
        self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.script {
            Script::Progress(steps) => {
                for (percent, stage) in steps {
                    ctx.progress.report(*percent, Some(stage));
                    tokio::task::yield_now().await;
                }
                Ok(result_for(target, &self.service))
            }
            Script::SucceedAfter(release) => {
                ctx.progress.report(10.0, Some("Ping Scan"));
                release.notified().await;
                Ok(result_for(target, &self.service))
            }
            Script::Hang => {
                ctx.progress.report(5.0, Some("Ping Scan"));
                ctx.cancel.cancelled().await;
                Err(ScannerError::Cancelled(ctx.scan_id))
            }
        }
    }
}

pub struct Harness {
    pub orchestrator: Arc<ScanOrchestrator>,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub registry: Arc<ScannerRegistry>,
    pub resilience: Resilience,
}

impl Harness {
    pub fn new(adapter: Arc<ScriptedNmap>, settings: OrchestratorSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let mut registry = ScannerRegistry::new();
        registry.register(adapter);
        let registry = Arc::new(registry);

        let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let resilience = Resilience::new(Arc::new(breakers), RetryConfig::no_retry());

        let orchestrator = Arc::new(
            ScanOrchestrator::new(store.clone(), queue.clone(), registry.clone(), resilience.clone())
                .with_settings(settings),
        );

        Self {
            orchestrator,
            store,
            queue,
            registry,
            resilience,
        }
    }

    /// A second orchestrator over the same store and queue, as another
    /// process would have
    pub fn peer(&self) -> ScanOrchestrator {
        ScanOrchestrator::new(
            self.store.clone(),
            self.queue.clone(),
            self.registry.clone(),
            self.resilience.clone(),
        )
    }
}

pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        scan_timeout: Duration::from_secs(30),
        engine_timeout: Duration::from_secs(30),
        cancel_poll_interval: Duration::from_millis(20),
        cancel_grace: Duration::from_secs(2),
    }
}

pub fn discovery(targets: &[&str]) -> ScanRequest {
    ScanRequest::new(
        Uuid::new_v4(),
        ScanType::Discovery,
        targets.iter().map(|t| t.to_string()).collect(),
    )
}

/// Poll until the scan reaches `status`
pub async fn wait_for_status(orchestrator: &ScanOrchestrator, scan_id: Uuid, status: ScanStatus) {
    for _ in 0..200 {
        if orchestrator.get_status(scan_id).await.unwrap().status() == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scan {} never reached {}", scan_id, status);
}
