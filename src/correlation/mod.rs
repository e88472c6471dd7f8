// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Correlation Module
 * CPE building, CVE lookup and vulnerability materialization
 * © 2026 Bountyy Oy
 */

pub mod cpe;
pub mod engine;
pub mod nvd;

pub use cpe::{build_cpe, normalize_version, CpeMatch, CpeSource};
pub use engine::{
    CorrelationEngine, CorrelationOptions, CorrelationResult, CorrelationSettings, CorrelationStatus,
    ScanCorrelation,
};
pub use nvd::{CveSource, NvdClient, NvdSettings};
