// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Vulnerability Management Core
 * Scan orchestration, scanner adapters and CVE correlation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod config;
pub mod database;
pub mod queue;
pub mod types;

// Production error handling and resilience modules
pub mod circuit_breaker;
pub mod errors;
pub mod resilience;
pub mod retry;

// Validation modules
pub mod validation;

// Scanner adapters and engine selection
pub mod registry;
pub mod scanners;

// Scan lifecycle
pub mod orchestrator;
pub mod worker;

// CPE building and CVE correlation
pub mod correlation;

pub mod service;

pub use errors::{ScannerError, ScannerResult};
pub use service::{ScanService, ScanStatusView};
