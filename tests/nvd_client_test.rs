// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - CVE API Client Tests
 * Pagination, query shape and rate limiting against a mock CVE API
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::time::Duration;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use vulnmgr_core::correlation::{CpeMatch, CpeSource, CveSource, NvdClient, NvdSettings};
use vulnmgr_core::errors::ScannerError;

const CVE_PATH: &str = "/rest/json/cves/2.0";

fn client(server: &MockServer, page_size: u32, api_key: Option<&str>) -> NvdClient {
    NvdClient::new(NvdSettings {
        base_url: format!("{}{}", server.uri(), CVE_PATH),
        api_key: api_key.map(str::to_string),
        results_per_page: page_size,
        max_pages: 5,
        request_timeout_secs: 5,
    })
    .unwrap()
}

fn openssh(version: Option<&str>) -> CpeMatch {
    CpeMatch {
        cpe: match version {
            Some(v) => format!("cpe:/a:openbsd:openssh:{}", v),
            None => "cpe:/a:openbsd:openssh".to_string(),
        },
        part: 'a',
        vendor: "openbsd".to_string(),
        product: "openssh".to_string(),
        version: version.map(str::to_string),
        confidence: 75,
        source: CpeSource::Mapped,
    }
}

fn record(id: &str, score: f64) -> serde_json::Value {
    serde_json::json!({
        "cve": {
            "id": id,
            "descriptions": [{"lang": "en", "value": format!("{} description", id)}],
            "metrics": {
                "cvssMetricV31": [{"type": "Primary", "cvssData": {"baseScore": score, "baseSeverity": "HIGH"}}]
            },
            "configurations": [{
                "nodes": [{
                    "cpeMatch": [{"vulnerable": true, "criteria": "cpe:2.3:a:openbsd:openssh:8.9:*:*:*:*:*:*:*"}]
                }]
            }]
        }
    })
}

#[tokio::test]
async fn test_versioned_lookup_follows_pages() {
    let server = MockServer::start().await;
    let cpe_name = "cpe:2.3:a:openbsd:openssh:8.9:*:*:*:*:*:*:*";

    Mock::given(method("GET"))
        .and(path(CVE_PATH))
        .and(query_param("cpeName", cpe_name))
        .and(query_param("startIndex", "0"))
        .and(query_param("resultsPerPage", "2"))
        .and(header("apiKey", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "totalResults": 3,
            "vulnerabilities": [record("CVE-2023-38408", 9.8), record("CVE-2023-51385", 6.5)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(CVE_PATH))
        .and(query_param("cpeName", cpe_name))
        .and(query_param("startIndex", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "totalResults": 3,
            "vulnerabilities": [record("CVE-2024-6387", 8.1)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let entries = client(&server, 2, Some("secret"))
        .fetch_by_cpe(&openssh(Some("8.9")))
        .await
        .unwrap();

    let ids: Vec<&str> = entries.iter().map(|e| e.cve_id.as_str()).collect();
    assert_eq!(ids, vec!["CVE-2023-38408", "CVE-2023-51385", "CVE-2024-6387"]);
    assert_eq!(entries[0].cvss_v3_score, Some(9.8));
    assert!(entries.iter().all(|e| e.affects("openbsd", "openssh")));
}

#[tokio::test]
async fn test_unversioned_lookup_uses_match_string() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CVE_PATH))
        .and(query_param("virtualMatchString", "cpe:2.3:a:openbsd:openssh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "totalResults": 1,
            "vulnerabilities": [record("CVE-2024-6387", 8.1)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let entries = client(&server, 100, None).fetch_by_cpe(&openssh(None)).await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CVE_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&server)
        .await;

    let err = client(&server, 100, None)
        .fetch_by_cpe(&openssh(Some("8.9")))
        .await
        .unwrap_err();

    match err {
        ScannerError::RateLimited { dependency, retry_after } => {
            assert_eq!(dependency, "nvd");
            assert_eq!(retry_after, Some(Duration::from_secs(30)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unknown_cpe_is_empty() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CVE_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let entries = client(&server, 100, None)
        .fetch_by_cpe(&openssh(Some("1.0")))
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_server_error_is_http_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CVE_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client(&server, 100, None)
        .fetch_by_cpe(&openssh(Some("8.9")))
        .await
        .unwrap_err();
    assert!(matches!(err, ScannerError::Http { status_code: 503, .. }));
}
