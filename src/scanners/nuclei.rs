// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Template Vulnerability Adapter
 * Runs nuclei against a target and normalizes its JSON-lines output
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use tracing::{debug, info, warn};

use super::process::{probe, run_streaming};
use super::{extract_cve_ids, ScanContext, ScannerAdapter};
use crate::errors::{ScannerError, ScannerResult};
use crate::types::{NormalizedResult, RawFinding, ScanOptions, ScanTarget, ScanType, ScannerKind};

const ENGINE: &str = "nuclei";

pub struct NucleiAdapter {
    binary: String,
    rate_limit: Option<u32>,
}

impl NucleiAdapter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            rate_limit: None,
        }
    }

    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.rate_limit = Some(requests_per_second);
        self
    }

    pub fn build_args(&self, target: &ScanTarget, options: &ScanOptions) -> Vec<String> {
        let mut args = vec![
            "-u".to_string(),
            target.as_str().to_string(),
            "-jsonl".to_string(),
            "-silent".to_string(),
            "-nc".to_string(),
            "-duc".to_string(),
        ];

        if let ScanOptions::Vulnerability(opts) = options {
            if !opts.severities.is_empty() {
                args.push("-severity".to_string());
                args.push(opts.severities.join(","));
            }
            if !opts.tags.is_empty() {
                args.push("-tags".to_string());
                args.push(opts.tags.join(","));
            }
        }

        if let Some(rl) = self.rate_limit {
            args.push("-rl".to_string());
            args.push(rl.to_string());
        }

        args
    }
}

#[async_trait]
impl ScannerAdapter for NucleiAdapter {
    fn kind(&self) -> ScannerKind {
        ScannerKind::Nuclei
    }

    fn supports(&self, scan_type: ScanType) -> bool {
        scan_type == ScanType::Vulnerability
    }

    async fn is_available(&self) -> bool {
        probe(&self.binary, &["-version"]).await
    }

    async fn run(
        &self,
        target: &ScanTarget,
        _scan_type: ScanType,
        options: &ScanOptions,
        ctx: &ScanContext,
    ) -> ScannerResult<NormalizedResult> {
        if let ScanOptions::Network(_) = options {
            return Err(ScannerError::InvalidOptions(
                "nuclei requires vulnerability scan options".to_string(),
            ));
        }

        let args = self.build_args(target, options);
        ctx.progress.report(5.0, Some("running nuclei templates"));

        let progress = ctx.progress.clone();
        let mut matches = 0usize;
        let output = run_streaming(ENGINE, &self.binary, &args, ctx, move |line| {
            if !line.trim().is_empty() {
                matches += 1;
                progress.report(50.0, Some(format!("{} template matches", matches).as_str()));
            }
        })
        .await?
        .into_success(ENGINE)?;

        let result = parse_nuclei_output(&output.stdout);
        ctx.progress.report(100.0, Some("nuclei finished"));

        info!(
            scan_id = %ctx.scan_id,
            target = %target,
            findings = result.raw_findings.len(),
            "nuclei scan finished"
        );

        Ok(result)
    }
}

/// Normalize nuclei JSON-lines output. Unparseable lines are logged and
/// skipped.
pub fn parse_nuclei_output(output: &str) -> NormalizedResult {
    let mut result = NormalizedResult::default();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to parse nuclei output line");
                continue;
            }
        };

        let parsed: NucleiOutput = match serde_json::from_value(value.clone()) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Unexpected nuclei finding shape");
                continue;
            }
        };

        result.raw_findings.push(to_finding(parsed, value));
    }

    result.ensure_hosts_for_services();
    debug!(findings = result.raw_findings.len(), "Parsed nuclei output");
    result
}

fn to_finding(out: NucleiOutput, detail: serde_json::Value) -> RawFinding {
    let classification = out.info.classification.unwrap_or_default();

    let mut cve_ids: Vec<String> = classification
        .cve_id
        .map(|ids| ids.into_vec())
        .unwrap_or_default()
        .into_iter()
        .map(|id| id.to_ascii_uppercase())
        .collect();
    if cve_ids.is_empty() {
        cve_ids = extract_cve_ids(&out.template_id.to_ascii_uppercase());
    }

    let host_ip = out
        .ip
        .as_deref()
        .and_then(|ip| ip.parse::<IpAddr>().ok())
        .or_else(|| out.host.as_deref().and_then(host_ip_from));

    let port = match &out.port {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    };

    RawFinding {
        engine: ScannerKind::Nuclei,
        identifier: out.template_id,
        name: out.info.name.unwrap_or_default(),
        host_ip,
        port,
        severity: out.info.severity,
        cvss_score: classification.cvss_score,
        cve_ids,
        detail,
    }
}

/// Bare IP from `host`, `host:port` or a URL
fn host_ip_from(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse() {
        return Some(ip);
    }
    if let Ok(url) = url::Url::parse(host) {
        return match url.host()? {
            url::Host::Ipv4(v4) => Some(IpAddr::V4(v4)),
            url::Host::Ipv6(v6) => Some(IpAddr::V6(v6)),
            url::Host::Domain(_) => None,
        };
    }
    host.rsplit_once(':').and_then(|(h, _)| h.parse().ok())
}

#[derive(Debug, Deserialize)]
struct NucleiOutput {
    #[serde(rename = "template-id")]
    template_id: String,
    info: NucleiInfo,
    host: Option<String>,
    ip: Option<String>,
    port: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct NucleiInfo {
    name: Option<String>,
    severity: Option<String>,
    classification: Option<NucleiClassification>,
}

#[derive(Debug, Default, Deserialize)]
struct NucleiClassification {
    #[serde(rename = "cve-id")]
    cve_id: Option<OneOrMany>,
    #[serde(rename = "cvss-score")]
    cvss_score: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}
