// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vulnmgr_core::config::{load_config_with_overrides, AppConfig};
use vulnmgr_core::correlation::{CorrelationEngine, NvdClient};
use vulnmgr_core::database::{MemoryStore, PostgresStore, Store};
use vulnmgr_core::orchestrator::ScanOrchestrator;
use vulnmgr_core::queue::{JobQueue, MemoryQueue, RedisQueue};
use vulnmgr_core::registry::ScannerRegistry;
use vulnmgr_core::worker::WorkerPool;

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config_with_overrides(config_path.as_deref())?;

    // RUST_LOG wins over the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.observability.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Scan worker v{} - Starting", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("scan-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: AppConfig) -> Result<()> {
    info!(
        workers = config.worker.workers,
        redis = config.redis.enabled,
        database = config.database.enabled,
        "Configuration loaded"
    );

    let store: Arc<dyn Store> = if config.database.enabled {
        let pg = PostgresStore::new(&config.database).await?;
        pg.init_schema().await?;
        info!("[SUCCESS] Connected to PostgreSQL");
        Arc::new(pg)
    } else {
        warn!("Database disabled, using in-memory store");
        Arc::new(MemoryStore::new())
    };

    let queue: Arc<dyn JobQueue> = if config.redis.enabled {
        let redis = RedisQueue::new(&config.redis.url).await?;
        info!("[SUCCESS] Connected to Redis");
        Arc::new(redis)
    } else {
        warn!("Redis disabled, using in-process queue");
        Arc::new(MemoryQueue::new())
    };

    let resilience = config.resilience.build();
    let registry = Arc::new(ScannerRegistry::from_config(&config.scanners)?);

    let orchestrator = Arc::new(
        ScanOrchestrator::new(Arc::clone(&store), Arc::clone(&queue), registry, resilience.clone())
            .with_settings(config.orchestrator.settings()),
    );

    let nvd = Arc::new(NvdClient::new(config.correlation.nvd.clone())?);
    let correlation = Arc::new(
        CorrelationEngine::new(Arc::clone(&store), nvd, resilience)
            .with_settings(config.correlation.settings()),
    );

    let pool = WorkerPool::new(config.worker.clone(), orchestrator, queue)
        .with_correlation(correlation, config.correlation.options());

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let metrics = pool.run(shutdown).await;
    info!(
        completed = metrics.completed_scans,
        failed = metrics.failed_scans,
        cancelled = metrics.cancelled_scans,
        correlations = metrics.correlations_run,
        "Scan worker stopped"
    );

    Ok(())
}
