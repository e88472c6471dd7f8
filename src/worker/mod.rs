// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Worker Module
 * Queue-driven scan execution
 *
 * © 2026 Bountyy Oy
 */

pub mod scan_worker;

pub use scan_worker::{WorkerMetrics, WorkerPool};
