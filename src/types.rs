// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use crate::circuit_breaker::Dependency;
use crate::errors::{ScannerError, ScannerResult};

/// Kind of scan requested by the caller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Discovery,
    PortScan,
    ServiceScan,
    Full,
    Vulnerability,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Discovery => "discovery",
            ScanType::PortScan => "port_scan",
            ScanType::ServiceScan => "service_scan",
            ScanType::Full => "full",
            ScanType::Vulnerability => "vulnerability",
        }
    }

    /// Whether this scan type is served by the network-discovery engine
    pub fn is_network_scan(&self) -> bool {
        !matches!(self, ScanType::Vulnerability)
    }
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScanType {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(ScanType::Discovery),
            "port_scan" => Ok(ScanType::PortScan),
            "service_scan" => Ok(ScanType::ServiceScan),
            "full" => Ok(ScanType::Full),
            "vulnerability" => Ok(ScanType::Vulnerability),
            other => Err(ScannerError::InvalidOptions(format!("unknown scan type '{}'", other))),
        }
    }
}

/// Scan lifecycle status. See `orchestrator::state_machine` for the allowed edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "PENDING",
            ScanStatus::Queued => "QUEUED",
            ScanStatus::Running => "RUNNING",
            ScanStatus::Completed => "COMPLETED",
            ScanStatus::Failed => "FAILED",
            ScanStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScanStatus {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ScanStatus::Pending),
            "QUEUED" => Ok(ScanStatus::Queued),
            "RUNNING" => Ok(ScanStatus::Running),
            "COMPLETED" => Ok(ScanStatus::Completed),
            "FAILED" => Ok(ScanStatus::Failed),
            "CANCELLED" => Ok(ScanStatus::Cancelled),
            other => Err(ScannerError::General(format!("unknown scan status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    SingleIp,
    Cidr,
}

/// A validated scan target. Only constructed by the target validator (or by
/// deserialization, which runs the validator again), so holding one means the
/// address space is private.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScanTarget {
    raw: String,
    kind: TargetKind,
    network: IpNetwork,
}

impl ScanTarget {
    pub(crate) fn new(raw: String, kind: TargetKind, network: IpNetwork) -> Self {
        Self { raw, kind, network }
    }

    /// Normalized textual form (`10.0.0.0/24`, `192.168.1.5`)
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn network(&self) -> IpNetwork {
        self.network
    }

    /// The address when this target is a single host
    pub fn single_ip(&self) -> Option<IpAddr> {
        match self.kind {
            TargetKind::SingleIp => Some(self.network.ip()),
            TargetKind::Cidr => None,
        }
    }
}

impl std::fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for ScanTarget {
    type Error = ScannerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        crate::validation::target_validator::validate(&value)
    }
}

impl From<ScanTarget> for String {
    fn from(target: ScanTarget) -> Self {
        target.raw
    }
}

/// Scanner engines the platform can drive
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    /// Network-discovery / port engine (subprocess, XML)
    Nmap,
    /// Template-based vulnerability engine (subprocess, JSON lines)
    Nuclei,
    /// Web-application engine (HTTP API)
    Zap,
    /// Full vulnerability-management engine (HTTP API, session + polling)
    Gvm,
}

impl ScannerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerKind::Nmap => "nmap",
            ScannerKind::Nuclei => "nuclei",
            ScannerKind::Zap => "zap",
            ScannerKind::Gvm => "gvm",
        }
    }

    /// Circuit breaker guarding this engine
    pub fn dependency(&self) -> Dependency {
        match self {
            ScannerKind::Nmap => Dependency::Nmap,
            ScannerKind::Nuclei => Dependency::Nuclei,
            ScannerKind::Zap => Dependency::Zap,
            ScannerKind::Gvm => Dependency::Gvm,
        }
    }
}

impl std::fmt::Display for ScannerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning for the network-discovery engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkScanOptions {
    /// Port list (`22,80,443`, `1-1024`); engine default when absent
    #[serde(default)]
    pub ports: Option<String>,

    /// Timing template 0..=5
    #[serde(default = "default_timing")]
    pub timing_template: u8,

    #[serde(default)]
    pub os_detection: bool,
}

fn default_timing() -> u8 {
    4
}

impl Default for NetworkScanOptions {
    fn default() -> Self {
        Self {
            ports: None,
            timing_template: default_timing(),
            os_detection: false,
        }
    }
}

/// Tuning for vulnerability engines
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityScanOptions {
    /// Force a specific engine instead of the configured fallback order
    #[serde(default)]
    pub engine: Option<ScannerKind>,

    /// Template severities to run (template engine)
    #[serde(default)]
    pub severities: Vec<String>,

    /// Template tags to run (template engine)
    #[serde(default)]
    pub tags: Vec<String>,

    /// Scan configuration id (full vulnerability-management engine)
    #[serde(default)]
    pub scan_config_id: Option<String>,
}

/// Per scan-type options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanOptions {
    Network(NetworkScanOptions),
    Vulnerability(VulnerabilityScanOptions),
}

impl ScanOptions {
    pub fn default_for(scan_type: ScanType) -> Self {
        if scan_type.is_network_scan() {
            ScanOptions::Network(NetworkScanOptions {
                os_detection: scan_type == ScanType::Full,
                ..NetworkScanOptions::default()
            })
        } else {
            ScanOptions::Vulnerability(VulnerabilityScanOptions::default())
        }
    }

    /// Reject option variants that do not belong to the scan type
    pub fn check_matches(&self, scan_type: ScanType) -> ScannerResult<()> {
        match (self, scan_type.is_network_scan()) {
            (ScanOptions::Network(opts), true) => {
                if opts.timing_template > 5 {
                    return Err(ScannerError::InvalidOptions(format!(
                        "timing template {} is outside 0..=5",
                        opts.timing_template
                    )));
                }
                Ok(())
            }
            (ScanOptions::Vulnerability(_), false) => Ok(()),
            _ => Err(ScannerError::InvalidOptions(format!(
                "options of kind '{}' do not apply to a {} scan",
                self.kind_name(),
                scan_type
            ))),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            ScanOptions::Network(_) => "network",
            ScanOptions::Vulnerability(_) => "vulnerability",
        }
    }
}

/// The Scan entity. Status and progress are private: they only change through
/// `orchestrator::state_machine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub scan_type: ScanType,
    pub(crate) status: ScanStatus,
    pub targets: Vec<ScanTarget>,
    pub options: ScanOptions,
    pub(crate) progress: u8,
    pub(crate) current_stage: Option<String>,
    pub external_job_id: Option<String>,
    pub scanner: Option<ScannerKind>,
    pub auto_correlate: bool,
    pub created_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) error: Option<String>,
    pub(crate) hosts_found: u32,
    pub(crate) services_found: u32,
}

impl Scan {
    /// A fresh scan in PENDING
    pub fn new(
        organization_id: Uuid,
        scan_type: ScanType,
        targets: Vec<ScanTarget>,
        options: ScanOptions,
        auto_correlate: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            scan_type,
            status: ScanStatus::Pending,
            targets,
            options,
            progress: 0,
            current_stage: None,
            external_job_id: None,
            scanner: None,
            auto_correlate,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            hosts_found: 0,
            services_found: 0,
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn current_stage(&self) -> Option<&str> {
        self.current_stage.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn hosts_found(&self) -> u32 {
        self.hosts_found
    }

    pub fn services_found(&self) -> u32 {
        self.services_found
    }
}

/// A discovered host, upserted by (organization, ip)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub ip: IpAddr,
    pub hostname: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A network service on an asset; the unit of correlation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub port: u16,
    pub protocol: String,
    pub name: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    /// CPE reported directly by the engine, if any
    pub cpe: Option<String>,
    pub detection_confidence: u8,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        }
    }

    /// Map a CVSS v3 base score onto the platform scale
    pub fn from_cvss_score(score: f32) -> Self {
        if score >= 9.0 {
            Severity::Critical
        } else if score >= 7.0 {
            Severity::High
        } else if score >= 4.0 {
            Severity::Medium
        } else if score > 0.0 {
            Severity::Low
        } else {
            Severity::Info
        }
    }

    /// Map a CVSS v3 severity band (`CRITICAL`, `HIGH`, ...) onto the platform
    /// scale, falling back to the numeric score when the band is absent
    pub fn from_cvss(band: Option<&str>, score: Option<f32>) -> Self {
        match band.map(|b| b.trim().to_ascii_uppercase()).as_deref() {
            Some("CRITICAL") => Severity::Critical,
            Some("HIGH") => Severity::High,
            Some("MEDIUM") => Severity::Medium,
            Some("LOW") => Severity::Low,
            Some("NONE") => Severity::Info,
            _ => score.map(Severity::from_cvss_score).unwrap_or(Severity::Info),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Severity::Critical),
            "HIGH" => Ok(Severity::High),
            "MEDIUM" => Ok(Severity::Medium),
            "LOW" => Ok(Severity::Low),
            "INFO" | "INFORMATIONAL" | "NONE" => Ok(Severity::Info),
            other => Err(ScannerError::General(format!("unknown severity '{}'", other))),
        }
    }
}

/// A vulnerability record. At most one exists per (service_id, cve_id).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub asset_id: Uuid,
    pub service_id: Option<Uuid>,
    pub cve_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub severity: Severity,
    pub cvss_score: Option<f32>,
    pub auto_created: bool,
    pub created_at: DateTime<Utc>,
}

impl Vulnerability {
    pub fn new(organization_id: Uuid, asset_id: Uuid, title: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            asset_id,
            service_id: None,
            cve_id: None,
            title: title.into(),
            description: None,
            severity,
            cvss_score: None,
            auto_created: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AffectedProduct {
    pub vendor: String,
    pub product: String,
}

impl AffectedProduct {
    pub fn new(vendor: impl Into<String>, product: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            product: product.into(),
        }
    }
}

/// Cached CVE record in front of the external CVE API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CveCacheEntry {
    pub cve_id: String,
    pub description: Option<String>,
    pub cvss_v3_score: Option<f32>,
    pub cvss_v3_severity: Option<String>,
    pub affected_products: Vec<AffectedProduct>,
    pub published: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl CveCacheEntry {
    pub fn affects(&self, vendor: &str, product: &str) -> bool {
        self.affected_products
            .iter()
            .any(|p| p.vendor.eq_ignore_ascii_case(vendor) && p.product.eq_ignore_ascii_case(product))
    }
}

/// Job handed to the worker pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanJob {
    pub job_id: String,
    pub scan_id: Uuid,
    pub organization_id: Uuid,
    pub scan_type: ScanType,
    pub scanner: ScannerKind,
    pub enqueued_at: DateTime<Utc>,
}

/// Progress message published while a scan runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub scan_id: Uuid,
    pub progress: u8,
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredHost {
    pub ip: IpAddr,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredService {
    pub host_ip: IpAddr,
    pub port: u16,
    pub protocol: String,
    pub name: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub cpe: Option<String>,
    /// 0..=100
    pub confidence: u8,
}

/// Engine-specific finding kept alongside the normalized hosts and services
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawFinding {
    pub engine: ScannerKind,
    pub identifier: String,
    pub name: String,
    pub host_ip: Option<IpAddr>,
    pub port: Option<u16>,
    pub severity: Option<String>,
    pub cvss_score: Option<f32>,
    #[serde(default)]
    pub cve_ids: Vec<String>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// Engine-independent scan output
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResult {
    pub hosts: Vec<DiscoveredHost>,
    pub services: Vec<DiscoveredService>,
    pub raw_findings: Vec<RawFinding>,
}

impl NormalizedResult {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.services.is_empty() && self.raw_findings.is_empty()
    }

    /// Fold another target's result into this one. Hosts are deduplicated by IP
    /// and a later hostname fills in a missing one.
    pub fn merge(&mut self, other: NormalizedResult) {
        for host in other.hosts {
            match self.hosts.iter_mut().find(|h| h.ip == host.ip) {
                Some(existing) => {
                    if existing.hostname.is_none() {
                        existing.hostname = host.hostname;
                    }
                }
                None => self.hosts.push(host),
            }
        }
        for service in other.services {
            let duplicate = self.services.iter().any(|s| {
                s.host_ip == service.host_ip && s.port == service.port && s.protocol == service.protocol
            });
            if !duplicate {
                self.services.push(service);
            }
        }
        self.raw_findings.extend(other.raw_findings);
    }

    /// (distinct hosts, services) as recorded on the completed scan. Hosts
    /// only referenced by a service count too.
    pub fn summary_counts(&self) -> (u32, u32) {
        let mut ips: Vec<IpAddr> = self.hosts.iter().map(|h| h.ip).collect();
        for service in &self.services {
            if !ips.contains(&service.host_ip) {
                ips.push(service.host_ip);
            }
        }
        (ips.len() as u32, self.services.len() as u32)
    }

    /// Every IP referenced by a service or finding is reported as a host too
    pub fn ensure_hosts_for_services(&mut self) {
        let mut missing: Vec<IpAddr> = Vec::new();
        let referenced = self
            .services
            .iter()
            .map(|s| s.host_ip)
            .chain(self.raw_findings.iter().filter_map(|f| f.host_ip));
        for ip in referenced {
            if !self.hosts.iter().any(|h| h.ip == ip) && !missing.contains(&ip) {
                missing.push(ip);
            }
        }
        self.hosts
            .extend(missing.into_iter().map(|ip| DiscoveredHost { ip, hostname: None }));
    }
}
