// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - CVE API Client
 * Paginated CVE lookup by CPE against the NVD 2.0 REST API
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::cpe::{parse_cpe, CpeMatch};
use crate::errors::{ScannerError, ScannerResult};
use crate::types::{AffectedProduct, CveCacheEntry};

pub const NVD_API_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";

/// Where CVE records come from when the cache has none
#[async_trait]
pub trait CveSource: Send + Sync {
    async fn fetch_by_cpe(&self, cpe: &CpeMatch) -> ScannerResult<Vec<CveCacheEntry>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NvdSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_page_size")]
    pub results_per_page: u32,
    /// Upper bound on pages fetched for one product
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    NVD_API_URL.to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    5
}

fn default_timeout() -> u64 {
    30
}

impl Default for NvdSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            results_per_page: default_page_size(),
            max_pages: default_max_pages(),
            request_timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdResponse {
    #[serde(default)]
    total_results: u32,
    #[serde(default)]
    vulnerabilities: Vec<NvdItem>,
}

#[derive(Debug, Deserialize)]
struct NvdItem {
    cve: NvdCve,
}

#[derive(Debug, Deserialize)]
struct NvdCve {
    id: String,
    #[serde(default)]
    published: Option<String>,
    #[serde(default)]
    descriptions: Vec<NvdDescription>,
    #[serde(default)]
    metrics: NvdMetrics,
    #[serde(default)]
    configurations: Vec<NvdConfiguration>,
}

#[derive(Debug, Deserialize)]
struct NvdDescription {
    lang: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct NvdMetrics {
    #[serde(rename = "cvssMetricV31", default)]
    v31: Vec<NvdCvssMetric>,
    #[serde(rename = "cvssMetricV30", default)]
    v30: Vec<NvdCvssMetric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCvssMetric {
    #[serde(default)]
    r#type: Option<String>,
    cvss_data: NvdCvssData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCvssData {
    base_score: f32,
    #[serde(default)]
    base_severity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NvdConfiguration {
    #[serde(default)]
    nodes: Vec<NvdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdNode {
    #[serde(default)]
    cpe_match: Vec<NvdCpeMatch>,
}

#[derive(Debug, Deserialize)]
struct NvdCpeMatch {
    #[serde(default)]
    vulnerable: bool,
    criteria: String,
}

impl NvdCve {
    fn into_entry(self, queried: &CpeMatch) -> CveCacheEntry {
        let description = self
            .descriptions
            .iter()
            .find(|d| d.lang == "en")
            .or_else(|| self.descriptions.first())
            .map(|d| d.value.clone());

        // CVSS 3.1 first, then 3.0; the NVD's own (Primary) metric wins
        let metric = [&self.metrics.v31, &self.metrics.v30]
            .into_iter()
            .find(|m| !m.is_empty())
            .and_then(|metrics| {
                metrics
                    .iter()
                    .find(|m| m.r#type.as_deref() == Some("Primary"))
                    .or_else(|| metrics.first())
            });

        let mut affected_products: Vec<AffectedProduct> = Vec::new();
        let criteria = self
            .configurations
            .iter()
            .flat_map(|c| c.nodes.iter())
            .flat_map(|n| n.cpe_match.iter())
            .filter(|m| m.vulnerable);
        for m in criteria {
            if let Some((_, vendor, product, _)) = parse_cpe(&m.criteria) {
                let p = AffectedProduct::new(vendor, product);
                if !affected_products.contains(&p) {
                    affected_products.push(p);
                }
            }
        }
        // The record came back for this product, so it affects it
        let queried_product = AffectedProduct::new(queried.vendor.clone(), queried.product.clone());
        if !affected_products.contains(&queried_product) {
            affected_products.push(queried_product);
        }

        CveCacheEntry {
            cve_id: self.id,
            description,
            cvss_v3_score: metric.map(|m| m.cvss_data.base_score),
            cvss_v3_severity: metric.and_then(|m| m.cvss_data.base_severity.clone()),
            affected_products,
            published: self.published,
            fetched_at: Utc::now(),
        }
    }
}

pub struct NvdClient {
    settings: NvdSettings,
    client: Client,
}

impl NvdClient {
    pub fn new(settings: NvdSettings) -> ScannerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!("vulnmgr-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScannerError::Configuration(format!("failed to build CVE API client: {}", e)))?;

        Ok(Self { settings, client })
    }

    async fn fetch_page(&self, cpe: &CpeMatch, start_index: u32) -> ScannerResult<NvdResponse> {
        let page_size = self.settings.results_per_page.to_string();
        let start = start_index.to_string();

        // A concrete version needs an exact CPE name; otherwise match every version
        let (param, value) = match cpe.version {
            Some(_) => ("cpeName", cpe.to_cpe23()),
            None => ("virtualMatchString", cpe.to_cpe23_prefix()),
        };

        let mut request = self.client.get(&self.settings.base_url).query(&[
            (param, value.as_str()),
            ("resultsPerPage", page_size.as_str()),
            ("startIndex", start.as_str()),
        ]);
        if let Some(key) = &self.settings.api_key {
            request = request.header("apiKey", key);
        }

        let response = request.send().await?;
        let status = response.status();

        // The NVD answers 403 when an unauthenticated client exceeds its quota
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ScannerError::RateLimited {
                dependency: "nvd".to_string(),
                retry_after,
            });
        }

        if status == StatusCode::NOT_FOUND {
            debug!(cpe = %cpe.cpe, "CVE API does not know this CPE");
            return Ok(NvdResponse {
                total_results: 0,
                vulnerabilities: Vec::new(),
            });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ScannerError::Http {
                status_code: status.as_u16(),
                url: self.settings.base_url.clone(),
                message,
            });
        }

        Ok(response.json::<NvdResponse>().await?)
    }
}

#[async_trait]
impl CveSource for NvdClient {
    async fn fetch_by_cpe(&self, cpe: &CpeMatch) -> ScannerResult<Vec<CveCacheEntry>> {
        let mut entries: Vec<CveCacheEntry> = Vec::new();
        let mut start_index = 0u32;
        let mut pages = 0u32;

        loop {
            let page = self.fetch_page(cpe, start_index).await?;
            pages += 1;

            let received = page.vulnerabilities.len() as u32;
            entries.extend(page.vulnerabilities.into_iter().map(|item| item.cve.into_entry(cpe)));

            start_index += received;
            if received == 0 || start_index >= page.total_results {
                break;
            }
            if pages >= self.settings.max_pages {
                debug!(cpe = %cpe.cpe, total = page.total_results, fetched = start_index, "Page limit reached");
                break;
            }
        }

        info!(cpe = %cpe.cpe, count = entries.len(), pages = pages, "Fetched CVEs");
        Ok(entries)
    }
}
