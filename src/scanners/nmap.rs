// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Network Discovery Adapter
 * Drives the nmap CLI and normalizes its XML report
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, info, warn};

use super::process::{probe, run_streaming};
use super::{ScanContext, ScannerAdapter};
use crate::errors::{EngineError, ScannerError, ScannerResult};
use crate::types::{
    DiscoveredHost, DiscoveredService, NetworkScanOptions, NormalizedResult, ScanOptions,
    ScanTarget, ScanType, ScannerKind,
};

const ENGINE: &str = "nmap";

static HOST_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<host\b[^>]*>(.*?)</host>").unwrap());
static HOST_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<status\s+state="([^"]+)""#).unwrap());
static ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<address\s+([^>]*?)/?>").unwrap());
static HOSTNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<hostname\s+name="([^"]+)""#).unwrap());
static PORT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<port\s+protocol="([^"]+)"\s+portid="(\d+)"\s*>(.*?)</port>"#).unwrap()
});
static PORT_STATE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<state\s+state="([^"]+)""#).unwrap());
static SERVICE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<service\s+([^>]*?)/?>").unwrap());
static CPE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<cpe>([^<]+)</cpe>").unwrap());
static FINISHED_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<finished\s+([^>]*?)/?>").unwrap());
static TASK_PROGRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<taskprogress\s+([^>]*?)/?>").unwrap());
static ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"([\w:-]+)="([^"]*)""#).unwrap());

pub struct NmapAdapter {
    binary: String,
}

impl NmapAdapter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Command-line arguments for one target
    pub fn build_args(target: &ScanTarget, scan_type: ScanType, opts: &NetworkScanOptions) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        match scan_type {
            ScanType::Discovery => args.push("-sn".to_string()),
            ScanType::PortScan => args.push("-sT".to_string()),
            ScanType::ServiceScan | ScanType::Full | ScanType::Vulnerability => {
                args.push("-sT".to_string());
                args.push("-sV".to_string());
            }
        }

        if scan_type != ScanType::Discovery {
            match &opts.ports {
                Some(ports) => {
                    args.push("-p".to_string());
                    args.push(ports.clone());
                }
                None if scan_type == ScanType::Full => args.push("-p-".to_string()),
                None => {
                    args.push("--top-ports".to_string());
                    args.push("1000".to_string());
                }
            }
        }

        if opts.os_detection && scan_type == ScanType::Full {
            args.push("-O".to_string());
        }

        args.push(format!("-T{}", opts.timing_template.min(5)));
        args.push("--stats-every".to_string());
        args.push("5s".to_string());
        args.push("-oX".to_string());
        args.push("-".to_string());
        args.push(target.as_str().to_string());
        args
    }
}

#[async_trait]
impl ScannerAdapter for NmapAdapter {
    fn kind(&self) -> ScannerKind {
        ScannerKind::Nmap
    }

    fn supports(&self, scan_type: ScanType) -> bool {
        scan_type.is_network_scan()
    }

    async fn is_available(&self) -> bool {
        probe(&self.binary, &["--version"]).await
    }

    async fn run(
        &self,
        target: &ScanTarget,
        scan_type: ScanType,
        options: &ScanOptions,
        ctx: &ScanContext,
    ) -> ScannerResult<NormalizedResult> {
        let opts = match options {
            ScanOptions::Network(opts) => opts.clone(),
            ScanOptions::Vulnerability(_) => {
                return Err(ScannerError::InvalidOptions(
                    "nmap requires network scan options".to_string(),
                ))
            }
        };

        let args = Self::build_args(target, scan_type, &opts);
        ctx.progress.report(0.0, Some("starting nmap"));

        let progress = ctx.progress.clone();
        let output = run_streaming(ENGINE, &self.binary, &args, ctx, move |line| {
            if let Some((task, percent)) = parse_task_progress(line) {
                progress.report(percent, Some(task.as_str()));
            }
        })
        .await?
        .into_success(ENGINE)?;

        let result = parse_nmap_xml(&output.stdout)?;
        ctx.progress.report(100.0, Some("nmap finished"));

        info!(
            scan_id = %ctx.scan_id,
            target = %target,
            hosts = result.hosts.len(),
            services = result.services.len(),
            "nmap scan finished"
        );

        Ok(result)
    }
}

/// `(task, percent)` from a `<taskprogress>` line
pub fn parse_task_progress(line: &str) -> Option<(String, f32)> {
    let caps = TASK_PROGRESS.captures(line)?;
    let attrs = attributes(caps.get(1)?.as_str());
    let percent = attrs.get("percent")?.parse::<f32>().ok()?;
    let task = attrs.get("task").cloned().unwrap_or_else(|| "scanning".to_string());
    Some((task, percent))
}

/// Normalize an nmap XML report. Hosts that are not up are skipped; a report
/// with no live hosts is an empty result.
pub fn parse_nmap_xml(xml: &str) -> ScannerResult<NormalizedResult> {
    if !xml.contains("<nmaprun") {
        return Err(malformed("missing <nmaprun> root element"));
    }

    if let Some(caps) = FINISHED_TAG.captures(xml) {
        let attrs = attributes(caps.get(1).map(|m| m.as_str()).unwrap_or_default());
        if attrs.get("exit").map(String::as_str) == Some("error") {
            let msg = attrs
                .get("errormsg")
                .cloned()
                .unwrap_or_else(|| "nmap reported an error".to_string());
            return Err(EngineError::Crashed {
                engine: ENGINE.to_string(),
                code: None,
                stderr: msg,
            }
            .into());
        }
    } else if !xml.contains("</nmaprun>") {
        return Err(malformed("report is truncated"));
    }

    let mut result = NormalizedResult::default();

    for host_caps in HOST_BLOCK.captures_iter(xml) {
        let block = host_caps.get(1).map(|m| m.as_str()).unwrap_or_default();

        let up = HOST_STATUS
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str() == "up")
            .unwrap_or(false);
        if !up {
            continue;
        }

        let Some(ip) = host_address(block) else {
            warn!("nmap host block without an IP address, skipping");
            continue;
        };

        let hostname = HOSTNAME
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| unescape(m.as_str()));

        result.hosts.push(DiscoveredHost { ip, hostname });

        for port_caps in PORT_BLOCK.captures_iter(block) {
            let protocol = port_caps.get(1).map(|m| m.as_str()).unwrap_or("tcp");
            let Some(port) = port_caps.get(2).and_then(|m| m.as_str().parse::<u16>().ok()) else {
                continue;
            };
            let body = port_caps.get(3).map(|m| m.as_str()).unwrap_or_default();

            let open = PORT_STATE
                .captures(body)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str() == "open")
                .unwrap_or(false);
            if !open {
                continue;
            }

            result.services.push(parse_service(ip, port, protocol, body));
        }
    }

    debug!(
        hosts = result.hosts.len(),
        services = result.services.len(),
        "Parsed nmap XML"
    );

    Ok(result)
}

fn parse_service(ip: IpAddr, port: u16, protocol: &str, body: &str) -> DiscoveredService {
    let attrs = SERVICE_TAG
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| attributes(m.as_str()))
        .unwrap_or_default();

    let non_empty = |key: &str| attrs.get(key).filter(|v| !v.trim().is_empty()).cloned();

    // nmap reports conf on a 0..=10 scale
    let confidence = attrs
        .get("conf")
        .and_then(|c| c.parse::<u8>().ok())
        .map(|c| (c.min(10)) * 10)
        .unwrap_or(50);

    let cpe = CPE_TAG
        .captures_iter(body)
        .filter_map(|c| c.get(1).map(|m| unescape(m.as_str())))
        .find(|cpe| cpe.starts_with("cpe:/a:"));

    DiscoveredService {
        host_ip: ip,
        port,
        protocol: protocol.to_string(),
        name: non_empty("name"),
        product: non_empty("product"),
        version: non_empty("version"),
        cpe,
        confidence,
    }
}

fn host_address(block: &str) -> Option<IpAddr> {
    ADDRESS.captures_iter(block).find_map(|caps| {
        let attrs = attributes(caps.get(1)?.as_str());
        match attrs.get("addrtype").map(String::as_str) {
            Some("ipv4") | Some("ipv6") => attrs.get("addr")?.parse().ok(),
            _ => None,
        }
    })
}

fn attributes(tag_body: &str) -> HashMap<String, String> {
    ATTR.captures_iter(tag_body)
        .filter_map(|c| Some((c.get(1)?.as_str().to_string(), unescape(c.get(2)?.as_str()))))
        .collect()
}

fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn malformed(reason: &str) -> ScannerError {
    EngineError::MalformedOutput {
        engine: ENGINE.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
