// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Web Application Adapter
 * Drives a ZAP daemon over its JSON API: spider, active scan, alerts
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{extract_cve_ids, ScanContext, ScannerAdapter};
use crate::errors::{EngineError, ScannerError, ScannerResult};
use crate::types::{NormalizedResult, RawFinding, ScanOptions, ScanTarget, ScanType, ScannerKind};

const ENGINE: &str = "zap";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZapSettings {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Status polling interval
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_poll_ms() -> u64 {
    5_000
}

fn default_request_timeout() -> u64 {
    30
}

impl ZapSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            poll_interval_ms: default_poll_ms(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

pub struct ZapAdapter {
    settings: ZapSettings,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ScanStarted {
    scan: String,
}

#[derive(Debug, Deserialize)]
struct ScanStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    alerts: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ZapAlert {
    #[serde(rename = "pluginId", default)]
    plugin_id: String,
    #[serde(default)]
    alert: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    risk: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    tags: Option<serde_json::Value>,
}

/// Which ZAP job is being polled
#[derive(Debug, Clone, Copy)]
enum Phase {
    Spider,
    ActiveScan,
}

impl Phase {
    fn component(&self) -> &'static str {
        match self {
            Phase::Spider => "spider",
            Phase::ActiveScan => "ascan",
        }
    }

    /// Share of the overall run, as (start, span) in percent
    fn window(&self) -> (f32, f32) {
        match self {
            Phase::Spider => (0.0, 30.0),
            Phase::ActiveScan => (30.0, 65.0),
        }
    }
}

impl ZapAdapter {
    pub fn new(settings: ZapSettings) -> ScannerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| ScannerError::Configuration(format!("failed to build ZAP client: {}", e)))?;

        Ok(Self { settings, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/JSON/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> ScannerResult<T> {
        let mut request = self.client.get(self.endpoint(path)).query(query);
        if let Some(key) = &self.settings.api_key {
            request = request.header("X-ZAP-API-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(EngineError::Authentication {
                engine: ENGINE.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            }
            .into());
        }

        let response = response.error_for_status()?;
        response.json::<T>().await.map_err(|e| {
            EngineError::MalformedOutput {
                engine: ENGINE.to_string(),
                reason: format!("{}: {}", path, e),
            }
            .into()
        })
    }

    async fn start(&self, phase: Phase, url: &str) -> ScannerResult<String> {
        let path = format!("{}/action/scan/", phase.component());
        let started: ScanStarted = match phase {
            Phase::Spider => self.get(&path, &[("url", url), ("recurse", "true")]).await?,
            Phase::ActiveScan => {
                self.get(&path, &[("url", url), ("recurse", "true"), ("inScopeOnly", "false")])
                    .await?
            }
        };
        debug!(phase = phase.component(), scan = %started.scan, "ZAP job started");
        Ok(started.scan)
    }

    async fn stop(&self, phase: Phase, scan_id: &str) {
        let path = format!("{}/action/stop/", phase.component());
        if let Err(e) = self.get::<serde_json::Value>(&path, &[("scanId", scan_id)]).await {
            warn!(phase = phase.component(), error = %e, "Failed to stop ZAP job");
        }
    }

    /// Poll a job until it reports 100%. Cancellation stops the job on the
    /// daemon before returning.
    async fn wait(&self, phase: Phase, scan_id: &str, ctx: &ScanContext) -> ScannerResult<()> {
        let path = format!("{}/view/status/", phase.component());
        let interval = Duration::from_millis(self.settings.poll_interval_ms);
        let (start, span) = phase.window();

        let query = [("scanId", scan_id)];

        loop {
            let status: ScanStatus = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    self.stop(phase, scan_id).await;
                    return Err(ScannerError::Cancelled(ctx.scan_id));
                }
                status = self.get(&path, &query) => status?,
            };
            let percent: f32 = status.status.parse().map_err(|_| EngineError::MalformedOutput {
                engine: ENGINE.to_string(),
                reason: format!("non-numeric status '{}'", status.status),
            })?;

            ctx.progress
                .report(start + span * percent / 100.0, Some(phase.component()));

            if percent >= 100.0 {
                return Ok(());
            }

            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    self.stop(phase, scan_id).await;
                    return Err(ScannerError::Cancelled(ctx.scan_id));
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn alerts(&self, base_url: &str, ip: IpAddr) -> ScannerResult<NormalizedResult> {
        let response: AlertsResponse = self
            .get("core/view/alerts/", &[("baseurl", base_url), ("start", "0")])
            .await?;

        let mut result = NormalizedResult::default();
        for value in response.alerts {
            let alert: ZapAlert = match serde_json::from_value(value.clone()) {
                Ok(a) => a,
                Err(e) => {
                    warn!(error = %e, "Skipping unexpected ZAP alert shape");
                    continue;
                }
            };

            let port = alert
                .url
                .as_deref()
                .and_then(|u| url::Url::parse(u).ok())
                .and_then(|u| u.port_or_known_default());

            let mut haystack = alert.reference.clone().unwrap_or_default();
            if let Some(tags) = &alert.tags {
                haystack.push(' ');
                haystack.push_str(&tags.to_string());
            }

            result.raw_findings.push(RawFinding {
                engine: ScannerKind::Zap,
                identifier: alert.plugin_id,
                name: alert.alert.or(alert.name).unwrap_or_default(),
                host_ip: Some(ip),
                port,
                severity: alert.risk,
                cvss_score: None,
                cve_ids: extract_cve_ids(&haystack),
                detail: value,
            });
        }

        result.ensure_hosts_for_services();
        Ok(result)
    }
}

#[async_trait]
impl ScannerAdapter for ZapAdapter {
    fn kind(&self) -> ScannerKind {
        ScannerKind::Zap
    }

    fn supports(&self, scan_type: ScanType) -> bool {
        scan_type == ScanType::Vulnerability
    }

    async fn is_available(&self) -> bool {
        self.get::<serde_json::Value>("core/view/version/", &[])
            .await
            .is_ok()
    }

    async fn run(
        &self,
        target: &ScanTarget,
        _scan_type: ScanType,
        _options: &ScanOptions,
        ctx: &ScanContext,
    ) -> ScannerResult<NormalizedResult> {
        let ip = target.single_ip().ok_or_else(|| EngineError::UnsupportedTarget {
            engine: ENGINE.to_string(),
            target: target.to_string(),
            reason: "web application scans need a single host".to_string(),
        })?;

        let base_url = match ip {
            IpAddr::V4(v4) => format!("http://{}", v4),
            IpAddr::V6(v6) => format!("http://[{}]", v6),
        };

        // Job live on the daemon, stopped if the timeout abandons `run`
        let mut running: Option<(Phase, String)> = None;
        let run = async {
            for phase in [Phase::Spider, Phase::ActiveScan] {
                let job = self.start(phase, &base_url).await?;
                running = Some((phase, job.clone()));
                self.wait(phase, &job, ctx).await?;
                running = None;
            }

            ctx.progress.report(95.0, Some("collecting alerts"));
            self.alerts(&base_url, ip).await
        };

        let outcome = tokio::time::timeout(ctx.timeout, run).await;
        let result = match outcome {
            Ok(result) => result?,
            Err(_) => {
                if let Some((phase, job)) = &running {
                    warn!(phase = phase.component(), timeout = ?ctx.timeout, "ZAP job exceeded engine timeout, stopping");
                    self.stop(*phase, job).await;
                }
                return Err(EngineError::Timeout {
                    engine: ENGINE.to_string(),
                    timeout: ctx.timeout,
                }
                .into())
            }
        };

        ctx.progress.report(100.0, Some("zap finished"));
        info!(
            scan_id = %ctx.scan_id,
            target = %target,
            alerts = result.raw_findings.len(),
            "ZAP scan finished"
        );
        Ok(result)
    }
}
