// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - CPE Builder
 * Turns a detected service into a platform identifier with a confidence
 *
 * @copyright 2026 Bountyy Oy
 */

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::Service;

/// Confidence when the engine reported the CPE itself
pub const ENGINE_CPE_CONFIDENCE: u8 = 95;
/// Constructed CPE with a version
pub const VERSIONED_CONFIDENCE: u8 = 75;
/// Constructed CPE without a version
pub const UNVERSIONED_CONFIDENCE: u8 = 55;

/// Detected product name (lowercase) -> (vendor, product) as used in CPE names
static PRODUCT_MAP: Lazy<HashMap<&'static str, (&'static str, &'static str)>> = Lazy::new(|| {
    [
        ("apache httpd", ("apache", "http_server")),
        ("apache http server", ("apache", "http_server")),
        ("apache", ("apache", "http_server")),
        ("apache tomcat", ("apache", "tomcat")),
        ("apache tomcat/coyote jsp engine", ("apache", "tomcat")),
        ("nginx", ("nginx", "nginx")),
        ("lighttpd", ("lighttpd", "lighttpd")),
        ("microsoft iis httpd", ("microsoft", "internet_information_services")),
        ("microsoft iis", ("microsoft", "internet_information_services")),
        ("openssh", ("openbsd", "openssh")),
        ("dropbear sshd", ("dropbear_ssh_project", "dropbear_ssh")),
        ("mysql", ("oracle", "mysql")),
        ("mariadb", ("mariadb", "mariadb")),
        ("postgresql", ("postgresql", "postgresql")),
        ("postgresql db", ("postgresql", "postgresql")),
        ("microsoft sql server", ("microsoft", "sql_server")),
        ("ms-sql-s", ("microsoft", "sql_server")),
        ("redis", ("redis", "redis")),
        ("redis key-value store", ("redis", "redis")),
        ("mongodb", ("mongodb", "mongodb")),
        ("elasticsearch", ("elastic", "elasticsearch")),
        ("memcached", ("memcached", "memcached")),
        ("vsftpd", ("beasts", "vsftpd")),
        ("proftpd", ("proftpd", "proftpd")),
        ("pure-ftpd", ("pureftpd", "pure-ftpd")),
        ("exim smtpd", ("exim", "exim")),
        ("exim", ("exim", "exim")),
        ("postfix smtpd", ("postfix", "postfix")),
        ("postfix", ("postfix", "postfix")),
        ("isc bind", ("isc", "bind")),
        ("dnsmasq", ("thekelleys", "dnsmasq")),
        ("samba smbd", ("samba", "samba")),
        ("openldap", ("openldap", "openldap")),
        ("squid http proxy", ("squid-cache", "squid")),
        ("haproxy", ("haproxy", "haproxy")),
        ("jetty", ("eclipse", "jetty")),
        ("node.js", ("nodejs", "node.js")),
        ("php", ("php", "php")),
        ("openssl", ("openssl", "openssl")),
        ("grafana", ("grafana", "grafana")),
        ("rabbitmq", ("pivotal_software", "rabbitmq")),
        ("vmware esxi", ("vmware", "esxi")),
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CpeSource {
    /// Reported by the scanner engine
    Engine,
    /// Found in the product table
    Mapped,
    /// Derived from the product name alone
    Heuristic,
}

/// A platform identifier built for a service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpeMatch {
    /// `cpe:/a:vendor:product[:version]`
    pub cpe: String,
    pub part: char,
    pub vendor: String,
    pub product: String,
    pub version: Option<String>,
    pub confidence: u8,
    pub source: CpeSource,
}

impl CpeMatch {
    fn new(part: char, vendor: &str, product: &str, version: Option<String>, confidence: u8, source: CpeSource) -> Self {
        let vendor = component(vendor);
        let product = component(product);
        let cpe = match &version {
            Some(v) => format!("cpe:/{}:{}:{}:{}", part, vendor, product, v),
            None => format!("cpe:/{}:{}:{}", part, vendor, product),
        };
        Self {
            cpe,
            part,
            vendor,
            product,
            version,
            confidence,
            source,
        }
    }

    /// CPE 2.3 formatted string, wildcarding everything past the version
    pub fn to_cpe23(&self) -> String {
        format!(
            "cpe:2.3:{}:{}:{}:{}:*:*:*:*:*:*:*",
            self.part,
            self.vendor,
            self.product,
            self.version.as_deref().unwrap_or("*")
        )
    }

    /// CPE 2.3 prefix matching every version of the product
    pub fn to_cpe23_prefix(&self) -> String {
        format!("cpe:2.3:{}:{}:{}", self.part, self.vendor, self.product)
    }
}

/// Strip a leading `v` and keep the leading run of digits and dots
/// (`v2.4.49` -> `2.4.49`, `8.9p1` -> `8.9`)
pub fn normalize_version(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let kept: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let kept = kept.trim_matches('.');

    if kept.is_empty() || !kept.chars().any(|c| c.is_ascii_digit()) {
        None
    } else {
        Some(kept.to_string())
    }
}

/// Lowercase product key with collapsed whitespace
fn product_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Key with common daemon suffixes removed
fn stripped_key(key: &str) -> String {
    let mut result = key.to_string();
    loop {
        let before = result.clone();
        result = result
            .trim_end_matches(" httpd")
            .trim_end_matches(" server")
            .trim_end_matches(" daemon")
            .trim()
            .to_string();
        if result == before {
            break;
        }
    }
    result
}

/// A CPE name component: lowercase, spaces to underscores, safe characters only
fn component(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect()
}

fn lookup(key: &str) -> Option<(&'static str, &'static str)> {
    PRODUCT_MAP
        .get(key)
        .or_else(|| PRODUCT_MAP.get(stripped_key(key).as_str()))
        .copied()
}

/// Parse `cpe:/a:vendor:product[:version]` or `cpe:2.3:a:vendor:product:version:...`
pub fn parse_cpe(raw: &str) -> Option<(char, String, String, Option<String>)> {
    let rest = raw
        .trim()
        .strip_prefix("cpe:2.3:")
        .or_else(|| raw.trim().strip_prefix("cpe:/"))?;

    let mut parts = rest.split(':');
    let part = parts.next()?.chars().next()?;
    if !matches!(part, 'a' | 'o' | 'h') {
        return None;
    }

    let vendor = parts.next().filter(|s| !s.is_empty())?.to_lowercase();
    let product = parts.next().filter(|s| !s.is_empty())?.to_lowercase();
    let version = parts
        .next()
        .filter(|v| !v.is_empty() && *v != "*" && *v != "-")
        .map(str::to_string);

    Some((part, vendor, product, version))
}

/// Build the CPE for a service, or `None` when nothing identifies it
pub fn build_cpe(service: &Service) -> Option<CpeMatch> {
    let version = service.version.as_deref().and_then(normalize_version);

    if let Some((part, vendor, product, engine_version)) = service.cpe.as_deref().and_then(parse_cpe) {
        let version = engine_version.or(version);
        return Some(CpeMatch::new(
            part,
            &vendor,
            &product,
            version,
            ENGINE_CPE_CONFIDENCE,
            CpeSource::Engine,
        ));
    }

    let confidence = if version.is_some() {
        VERSIONED_CONFIDENCE
    } else {
        UNVERSIONED_CONFIDENCE
    };

    let product_name = service
        .product
        .as_deref()
        .map(product_key)
        .filter(|k| !k.is_empty());
    let service_name = service
        .name
        .as_deref()
        .map(product_key)
        .filter(|k| !k.is_empty());

    // The service name is consulted only when the engine saw no product at
    // all, and never scores above an unversioned match
    let mapped = match product_name.as_deref() {
        Some(product) => lookup(product).map(|m| (m, confidence)),
        None => service_name
            .as_deref()
            .and_then(lookup)
            .map(|m| (m, UNVERSIONED_CONFIDENCE)),
    };

    if let Some(((vendor, product), confidence)) = mapped {
        return Some(CpeMatch::new('a', vendor, product, version, confidence, CpeSource::Mapped));
    }

    // Unknown product: only worth a guess when a version pins it down
    let version = version?;
    let name = stripped_key(&product_name?);
    let guessed = component(&name);
    if guessed.is_empty() {
        return None;
    }
    Some(CpeMatch::new(
        'a',
        &guessed,
        &guessed,
        Some(version),
        confidence,
        CpeSource::Heuristic,
    ))
}
