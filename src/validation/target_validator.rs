// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Scan Target Validator
 * Network-safety policy for scan targets
 *
 * Only literal IPv4 addresses and CIDR networks that sit entirely inside the
 * private ranges are accepted. Hostnames are rejected without resolution:
 * a name that resolves to a private address now may resolve to a public one
 * by the time the scanner runs.
 *
 * © 2026 Bountyy Oy
 */

use ipnetwork::{IpNetwork, Ipv4Network};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

use crate::errors::{ScannerError, ScannerResult, TargetError, TargetFailure};
use crate::types::{ScanTarget, TargetKind};

/// Address space a scan may touch
static PRIVATE_RANGES: Lazy<Vec<Ipv4Network>> = Lazy::new(|| {
    [
        (Ipv4Addr::new(10, 0, 0, 0), 8),
        (Ipv4Addr::new(172, 16, 0, 0), 12),
        (Ipv4Addr::new(192, 168, 0, 0), 16),
        (Ipv4Addr::new(127, 0, 0, 0), 8),
        (Ipv4Addr::new(169, 254, 0, 0), 16),
    ]
    .into_iter()
    .filter_map(|(addr, prefix)| Ipv4Network::new(addr, prefix).ok())
    .collect()
});

/// Response shape for pre-submission checks by the frontend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetValidation {
    pub valid: bool,
    pub normalized: Option<String>,
    pub kind: Option<TargetKind>,
    pub error: Option<String>,
}

/// Validate a single target string
pub fn validate(target: &str) -> ScannerResult<ScanTarget> {
    check(target).map_err(ScannerError::Validation)
}

/// Validate a list of targets. Every failing element is reported with its
/// 1-indexed position.
pub fn validate_multiple<S: AsRef<str>>(targets: &[S]) -> ScannerResult<Vec<ScanTarget>> {
    if targets.is_empty() {
        return Err(ScannerError::Validation(TargetError::NoTargets));
    }

    let mut accepted = Vec::with_capacity(targets.len());
    let mut failures = Vec::new();

    for (i, target) in targets.iter().enumerate() {
        match check(target.as_ref()) {
            Ok(t) => accepted.push(t),
            Err(reason) => failures.push(TargetFailure {
                index: i + 1,
                target: target.as_ref().trim().to_string(),
                reason,
            }),
        }
    }

    if failures.is_empty() {
        Ok(accepted)
    } else {
        Err(ScannerError::Validation(TargetError::Items(failures)))
    }
}

/// Validation result in the frontend's response shape
pub fn describe(target: &str) -> TargetValidation {
    match check(target) {
        Ok(t) => TargetValidation {
            valid: true,
            normalized: Some(t.as_str().to_string()),
            kind: Some(t.kind()),
            error: None,
        },
        Err(e) => TargetValidation {
            valid: false,
            normalized: None,
            kind: None,
            error: Some(e.to_string()),
        },
    }
}

/// Whether the IP lies inside one of the permitted private ranges
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => PRIVATE_RANGES.iter().any(|range| range.contains(v4)),
        IpAddr::V6(_) => false,
    }
}

fn check(raw: &str) -> Result<ScanTarget, TargetError> {
    let target = raw.trim();
    if target.is_empty() {
        return Err(TargetError::Empty);
    }

    if target.contains('/') {
        return check_cidr(target);
    }

    if looks_like_ip_literal(target) {
        return check_ip(target);
    }

    Err(TargetError::Hostname(target.to_string()))
}

fn check_cidr(target: &str) -> Result<ScanTarget, TargetError> {
    let network: IpNetwork = target.parse().map_err(|e| TargetError::MalformedCidr {
        target: target.to_string(),
        reason: format!("{}", e),
    })?;

    let v4 = match network {
        IpNetwork::V4(v4) => v4,
        IpNetwork::V6(_) => return Err(TargetError::PublicAddress(target.to_string())),
    };

    let first = v4.network();
    let last = v4.broadcast();
    let contained = PRIVATE_RANGES
        .iter()
        .any(|range| range.contains(first) && range.contains(last));

    if !contained {
        return Err(TargetError::PublicAddress(target.to_string()));
    }

    let normalized = Ipv4Network::new(first, v4.prefix()).map_err(|e| TargetError::MalformedCidr {
        target: target.to_string(),
        reason: format!("{}", e),
    })?;

    Ok(ScanTarget::new(
        normalized.to_string(),
        TargetKind::Cidr,
        IpNetwork::V4(normalized),
    ))
}

fn check_ip(target: &str) -> Result<ScanTarget, TargetError> {
    let ip: IpAddr = target
        .parse()
        .map_err(|_| TargetError::MalformedIp(target.to_string()))?;

    if !is_private(ip) {
        return Err(TargetError::PublicAddress(target.to_string()));
    }

    let network = IpNetwork::from(ip);
    Ok(ScanTarget::new(ip.to_string(), TargetKind::SingleIp, network))
}

/// Digits and dots (IPv4) or hex digits and colons (IPv6). Anything else is
/// treated as a hostname.
fn looks_like_ip_literal(target: &str) -> bool {
    let v4_shape = target.chars().all(|c| c.is_ascii_digit() || c == '.');
    let v6_shape = target.contains(':')
        && target
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.');
    v4_shape || v6_shape
}
