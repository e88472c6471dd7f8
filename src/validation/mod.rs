// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Validation Module
 * Network-safety validation for scan targets
 *
 * Copyright 2026 Bountyy Oy
 */

pub mod target_validator;

pub use target_validator::{describe, is_private, validate, validate_multiple, TargetValidation};
