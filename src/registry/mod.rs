// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Registry Module
 * Scanner adapter registry and engine selection
 * © 2026 Bountyy Oy
 */

pub mod scanner_registry;

pub use scanner_registry::{ScannerRegistry, DEFAULT_VULNERABILITY_FALLBACK};
