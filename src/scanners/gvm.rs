// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Vulnerability Management Adapter
 * Drives a Greenbone (GVM) deployment through its JSON gateway:
 * session login, target + task creation, status polling, report fetch
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ScanContext, ScannerAdapter};
use crate::errors::{EngineError, ScannerError, ScannerResult};
use crate::types::{
    DiscoveredHost, DiscoveredService, NormalizedResult, RawFinding, ScanOptions, ScanTarget,
    ScanType, ScannerKind,
};

const ENGINE: &str = "gvm";

/// "Full and fast" scan configuration shipped with every GVM feed
pub const DEFAULT_SCAN_CONFIG: &str = "daba56c8-73ec-11df-a475-002264764cea";
/// Built-in OpenVAS scanner
pub const DEFAULT_SCANNER: &str = "08b69003-5fc2-4037-a479-93b440211c73";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GvmSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_poll_ms() -> u64 {
    10_000
}

fn default_request_timeout() -> u64 {
    60
}

impl GvmSettings {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            poll_interval_ms: default_poll_ms(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Started {
    report_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    status: String,
    #[serde(default)]
    progress: i32,
}

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(default)]
    hosts: Vec<ReportHost>,
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ReportHost {
    ip: String,
    #[serde(default)]
    hostname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportResult {
    #[serde(default)]
    name: String,
    host: ReportHost,
    #[serde(default)]
    port: Option<String>,
    #[serde(default)]
    severity: Option<f32>,
    #[serde(default)]
    threat: Option<String>,
    nvt: Nvt,
}

#[derive(Debug, Deserialize)]
struct Nvt {
    oid: String,
    #[serde(default)]
    cves: Vec<String>,
}

pub struct GvmAdapter {
    settings: GvmSettings,
    client: Client,
    session: Mutex<Option<String>>,
}

impl GvmAdapter {
    pub fn new(settings: GvmSettings) -> ScannerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| ScannerError::Configuration(format!("failed to build GVM client: {}", e)))?;

        Ok(Self {
            settings,
            client,
            session: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn login(&self) -> ScannerResult<String> {
        let response = self
            .client
            .post(self.url("login"))
            .json(&serde_json::json!({
                "username": self.settings.username,
                "password": self.settings.password,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED || response.status() == StatusCode::FORBIDDEN {
            return Err(EngineError::Authentication {
                engine: ENGINE.to_string(),
                reason: "credentials rejected".to_string(),
            }
            .into());
        }

        let login: LoginResponse = response.error_for_status()?.json().await.map_err(malformed)?;
        debug!("GVM session established");
        Ok(login.token)
    }

    async fn token(&self) -> ScannerResult<String> {
        let mut session = self.session.lock().await;
        if let Some(token) = session.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login().await?;
        *session = Some(token.clone());
        Ok(token)
    }

    /// Authenticated request. An expired session is renewed once.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ScannerResult<T> {
        let mut renewed = false;

        loop {
            let token = self.token().await?;
            let mut builder = self.client.request(method.clone(), self.url(path)).bearer_auth(&token);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            if response.status() == StatusCode::UNAUTHORIZED && !renewed {
                debug!("GVM session expired, logging in again");
                *self.session.lock().await = None;
                renewed = true;
                continue;
            }
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(EngineError::Authentication {
                    engine: ENGINE.to_string(),
                    reason: "session rejected after renewal".to_string(),
                }
                .into());
            }

            return response.error_for_status()?.json::<T>().await.map_err(malformed);
        }
    }

    async fn stop(&self, task_id: &str) {
        let path = format!("tasks/{}/stop", task_id);
        if let Err(e) = self
            .request::<serde_json::Value>(Method::POST, &path, None)
            .await
        {
            warn!(task_id = task_id, error = %e, "Failed to stop GVM task");
        }
    }

    async fn wait(&self, task_id: &str, ctx: &ScanContext) -> ScannerResult<()> {
        let path = format!("tasks/{}", task_id);
        let interval = Duration::from_millis(self.settings.poll_interval_ms);

        loop {
            let status: TaskStatus = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(self.cancelled(task_id, ctx).await),
                status = self.request(Method::GET, &path, None) => status?,
            };
            debug!(task_id = task_id, status = %status.status, progress = status.progress, "GVM task status");

            match status.status.as_str() {
                "Done" => return Ok(()),
                "Stopped" | "Interrupted" | "Stop Requested" => {
                    return Err(EngineError::JobFailed {
                        engine: ENGINE.to_string(),
                        job_id: task_id.to_string(),
                        reason: format!("task ended as '{}'", status.status),
                    }
                    .into())
                }
                _ => {
                    let pct = status.progress.clamp(0, 100) as f32;
                    ctx.progress.report(10.0 + pct * 0.85, Some(status.status.as_str()));
                }
            }

            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(self.cancelled(task_id, ctx).await),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn cancelled(&self, task_id: &str, ctx: &ScanContext) -> ScannerError {
        self.stop(task_id).await;
        ScannerError::Cancelled(ctx.scan_id)
    }

    /// `running` holds the id of a task started on the manager until it
    /// finishes, so the caller can stop it when this future is abandoned
    async fn scan(
        &self,
        target: &ScanTarget,
        options: &ScanOptions,
        ctx: &ScanContext,
        running: &mut Option<String>,
    ) -> ScannerResult<NormalizedResult> {
        let config_id = match options {
            ScanOptions::Vulnerability(opts) => opts
                .scan_config_id
                .clone()
                .unwrap_or_else(|| DEFAULT_SCAN_CONFIG.to_string()),
            ScanOptions::Network(_) => DEFAULT_SCAN_CONFIG.to_string(),
        };

        ctx.progress.report(0.0, Some("creating GVM target"));
        let name = format!("scan-{}-{}", ctx.scan_id, target);
        let gvm_target: Created = self
            .request(
                Method::POST,
                "targets",
                Some(&serde_json::json!({ "name": name, "hosts": [target.as_str()] })),
            )
            .await?;

        let task: Created = self
            .request(
                Method::POST,
                "tasks",
                Some(&serde_json::json!({
                    "name": name,
                    "target_id": gvm_target.id,
                    "config_id": config_id,
                    "scanner_id": DEFAULT_SCANNER,
                })),
            )
            .await?;
        *running = Some(task.id.clone());

        let started: Started = self
            .request(Method::POST, &format!("tasks/{}/start", task.id), None)
            .await?;
        ctx.progress.report(10.0, Some("GVM task started"));

        self.wait(&task.id, ctx).await?;
        *running = None;

        ctx.progress.report(95.0, Some("fetching GVM report"));
        let report: Report = self
            .request(Method::GET, &format!("reports/{}", started.report_id), None)
            .await?;

        Ok(normalize_report(report))
    }
}

#[async_trait]
impl ScannerAdapter for GvmAdapter {
    fn kind(&self) -> ScannerKind {
        ScannerKind::Gvm
    }

    fn supports(&self, scan_type: ScanType) -> bool {
        scan_type == ScanType::Vulnerability
    }

    async fn is_available(&self) -> bool {
        match self.client.get(self.url("version")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn run(
        &self,
        target: &ScanTarget,
        _scan_type: ScanType,
        options: &ScanOptions,
        ctx: &ScanContext,
    ) -> ScannerResult<NormalizedResult> {
        let mut running = None;
        let outcome = tokio::time::timeout(ctx.timeout, self.scan(target, options, ctx, &mut running)).await;
        let result = match outcome {
            Ok(result) => result?,
            Err(_) => {
                if let Some(task_id) = running.as_deref() {
                    warn!(task_id = task_id, timeout = ?ctx.timeout, "GVM task exceeded engine timeout, stopping");
                    self.stop(task_id).await;
                }
                return Err(EngineError::Timeout {
                    engine: ENGINE.to_string(),
                    timeout: ctx.timeout,
                }
                .into())
            }
        };

        ctx.progress.report(100.0, Some("gvm finished"));
        info!(
            scan_id = %ctx.scan_id,
            target = %target,
            hosts = result.hosts.len(),
            findings = result.raw_findings.len(),
            "GVM scan finished"
        );
        Ok(result)
    }
}

fn normalize_report(report: Report) -> NormalizedResult {
    let mut result = NormalizedResult::default();

    for host in report.hosts {
        match host.ip.parse::<IpAddr>() {
            Ok(ip) => result.hosts.push(DiscoveredHost {
                ip,
                hostname: host.hostname.filter(|h| !h.is_empty()),
            }),
            Err(_) => warn!(ip = %host.ip, "GVM report host is not an IP, skipping"),
        }
    }

    for value in report.results {
        let item: ReportResult = match serde_json::from_value(value.clone()) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Skipping unexpected GVM result shape");
                continue;
            }
        };

        let Ok(ip) = item.host.ip.parse::<IpAddr>() else {
            continue;
        };

        // "443/tcp"; "general/tcp" has no port
        let (port, protocol) = match item.port.as_deref().and_then(|p| p.split_once('/')) {
            Some((port, proto)) => (port.parse::<u16>().ok(), proto.to_string()),
            None => (None, "tcp".to_string()),
        };

        if let Some(port) = port {
            result.services.push(DiscoveredService {
                host_ip: ip,
                port,
                protocol,
                name: None,
                product: None,
                version: None,
                cpe: None,
                confidence: 70,
            });
        }

        result.raw_findings.push(RawFinding {
            engine: ScannerKind::Gvm,
            identifier: item.nvt.oid,
            name: item.name,
            host_ip: Some(ip),
            port,
            severity: item.threat,
            cvss_score: item.severity,
            cve_ids: item.nvt.cves.into_iter().filter(|c| c.starts_with("CVE-")).collect(),
            detail: value,
        });
    }

    // merge() deduplicates the services a report repeats per result
    let mut normalized = NormalizedResult::default();
    normalized.merge(result);
    normalized.ensure_hosts_for_services();
    normalized
}

fn malformed(err: reqwest::Error) -> ScannerError {
    EngineError::MalformedOutput {
        engine: ENGINE.to_string(),
        reason: err.to_string(),
    }
    .into()
}
