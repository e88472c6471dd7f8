// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Scanner Registry
 * Enum-keyed registry of scanner adapters and the engine selection policy
 * © 2026 Bountyy Oy
 */

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ScannersConfig;
use crate::errors::{ScannerError, ScannerResult};
use crate::scanners::{GvmAdapter, NmapAdapter, NucleiAdapter, ScannerAdapter, ZapAdapter};
use crate::types::{ScanOptions, ScanType, ScannerKind};

/// Vulnerability engines tried in order when the caller names none
pub const DEFAULT_VULNERABILITY_FALLBACK: [ScannerKind; 2] = [ScannerKind::Nuclei, ScannerKind::Gvm];

pub struct ScannerRegistry {
    adapters: HashMap<ScannerKind, Arc<dyn ScannerAdapter>>,
    vulnerability_fallback: Vec<ScannerKind>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            vulnerability_fallback: DEFAULT_VULNERABILITY_FALLBACK.to_vec(),
        }
    }

    /// Registry with every engine the configuration enables
    pub fn from_config(config: &ScannersConfig) -> ScannerResult<Self> {
        let mut registry = Self::new().with_fallback(config.vulnerability_fallback.clone());

        registry.register(Arc::new(NmapAdapter::new(config.nmap_path.clone())));

        let mut nuclei = NucleiAdapter::new(config.nuclei_path.clone());
        if let Some(rl) = config.nuclei_rate_limit {
            nuclei = nuclei.with_rate_limit(rl);
        }
        registry.register(Arc::new(nuclei));

        if let Some(zap) = &config.zap {
            registry.register(Arc::new(ZapAdapter::new(zap.clone())?));
        }
        if let Some(gvm) = &config.gvm {
            registry.register(Arc::new(GvmAdapter::new(gvm.clone())?));
        }

        info!(engines = ?registry.kinds(), fallback = ?registry.vulnerability_fallback, "Scanner registry initialized");
        Ok(registry)
    }

    pub fn with_fallback(mut self, order: Vec<ScannerKind>) -> Self {
        self.vulnerability_fallback = order;
        self
    }

    /// Register an adapter, replacing any previous one of the same kind
    pub fn register(&mut self, adapter: Arc<dyn ScannerAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ScannerKind) -> Option<Arc<dyn ScannerAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ScannerKind> {
        let mut kinds: Vec<ScannerKind> = self.adapters.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Pick the engine for a scan. Network scan types go to the discovery
    /// engine. Vulnerability scans use the requested engine, or the first
    /// available engine in the fallback order.
    pub async fn select(&self, scan_type: ScanType, options: &ScanOptions) -> ScannerResult<ScannerKind> {
        if scan_type.is_network_scan() {
            return match self.adapters.get(&ScannerKind::Nmap) {
                Some(adapter) if adapter.supports(scan_type) => Ok(ScannerKind::Nmap),
                _ => Err(ScannerError::NoScannerAvailable(scan_type)),
            };
        }

        let requested = match options {
            ScanOptions::Vulnerability(opts) => opts.engine,
            ScanOptions::Network(_) => None,
        };

        if let Some(kind) = requested {
            return match self.adapters.get(&kind) {
                Some(adapter) if adapter.supports(scan_type) && adapter.is_available().await => Ok(kind),
                _ => Err(ScannerError::NoScannerAvailable(scan_type)),
            };
        }

        for kind in &self.vulnerability_fallback {
            let Some(adapter) = self.adapters.get(kind) else {
                continue;
            };
            if !adapter.supports(scan_type) {
                continue;
            }
            if adapter.is_available().await {
                debug!(engine = %kind, "Selected vulnerability engine");
                return Ok(*kind);
            }
            debug!(engine = %kind, "Vulnerability engine unavailable, trying next");
        }

        Err(ScannerError::NoScannerAvailable(scan_type))
    }
}

impl Default for ScannerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
