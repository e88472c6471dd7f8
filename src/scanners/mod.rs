// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scanner Adapters
 * One adapter per scanner engine, all producing a NormalizedResult
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::ScannerResult;
use crate::types::{NormalizedResult, ScanOptions, ScanTarget, ScanType, ScannerKind};

pub mod gvm;
pub mod nmap;
pub mod nuclei;
pub mod process;
pub mod zap;

pub use gvm::{GvmAdapter, GvmSettings};
pub use nmap::NmapAdapter;
pub use nuclei::NucleiAdapter;
pub use zap::{ZapAdapter, ZapSettings};

static CVE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"CVE-\d{4}-\d{4,}").unwrap());

/// Capability shared by every scanner engine
#[async_trait]
pub trait ScannerAdapter: Send + Sync {
    fn kind(&self) -> ScannerKind;

    /// Scan types this engine can serve
    fn supports(&self, scan_type: ScanType) -> bool;

    /// Whether the engine is installed / reachable right now
    async fn is_available(&self) -> bool;

    /// Scan one validated target. An unreachable host is an empty result,
    /// not an error. Engine crashes and timeouts are errors.
    async fn run(
        &self,
        target: &ScanTarget,
        scan_type: ScanType,
        options: &ScanOptions,
        ctx: &ScanContext,
    ) -> ScannerResult<NormalizedResult>;
}

/// Progress reported by an adapter, 0..=100 within its own run
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub stage: Option<String>,
}

/// Channel end adapters report progress into. A sink can be narrowed to a
/// sub-range so several targets share one 0..=100 scale.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    offset: f32,
    span: f32,
}

impl ProgressSink {
    pub fn new(tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            tx: Some(tx),
            offset: 0.0,
            span: 100.0,
        }
    }

    /// A sink that drops every update
    pub fn detached() -> Self {
        Self {
            tx: None,
            offset: 0.0,
            span: 100.0,
        }
    }

    /// Narrow to the slot of target `index` out of `total`
    pub fn scoped(&self, index: usize, total: usize) -> Self {
        let total = total.max(1) as f32;
        let span = self.span / total;
        Self {
            tx: self.tx.clone(),
            offset: self.offset + span * index as f32,
            span,
        }
    }

    pub fn report(&self, percent: f32, stage: Option<&str>) {
        let Some(tx) = &self.tx else { return };
        let local = percent.clamp(0.0, 100.0);
        let global = (self.offset + self.span * local / 100.0).round().clamp(0.0, 100.0) as u8;
        // Receiver gone means the scan is over; nothing to report to
        let _ = tx.send(ProgressUpdate {
            percent: global,
            stage: stage.map(str::to_string),
        });
    }
}

/// Per-run context handed to an adapter
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub scan_id: Uuid,
    pub progress: ProgressSink,
    pub cancel: CancellationToken,
    /// Bound on a single engine invocation
    pub timeout: Duration,
}

impl ScanContext {
    pub fn new(scan_id: Uuid, progress: ProgressSink, cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            scan_id,
            progress,
            cancel,
            timeout,
        }
    }

    pub fn for_target(&self, index: usize, total: usize) -> Self {
        Self {
            progress: self.progress.scoped(index, total),
            ..self.clone()
        }
    }
}

/// CVE identifiers mentioned anywhere in `text`, deduplicated in order
pub(crate) fn extract_cve_ids(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in CVE_ID.find_iter(text) {
        let id = m.as_str().to_string();
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
