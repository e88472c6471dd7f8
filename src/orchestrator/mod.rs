// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Orchestrator Module
 * Scan lifecycle: creation, dispatch to an engine, progress, cancellation
 * © 2026 Bountyy Oy
 */

pub mod scan_orchestrator;
pub mod state_machine;

pub use scan_orchestrator::{
    DispatchOutcome, OrchestratorSettings, ScanOrchestrator, ScanRequest, SCANNER_UNAVAILABLE,
};
pub use state_machine::can_transition;
