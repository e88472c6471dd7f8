// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

pub mod core;
pub mod loader;
pub mod validation;

pub use core::{
    AppConfig, CorrelationConfig, ObservabilityConfig, OrchestratorConfig, RedisConfig,
    ResilienceConfig, ScannersConfig, WorkerConfig,
};

pub use loader::{load_config_with_overrides, ConfigFormat, ConfigLoader};

pub use validation::ConfigValidator;

pub use crate::database::DatabaseConfig;
