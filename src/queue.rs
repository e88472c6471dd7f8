// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::debug;
use uuid::Uuid;

use crate::errors::{ScannerError, ScannerResult};
use crate::types::{ScanJob, ScanProgress, ScanStatus};

const QUEUE_KEY: &str = "scan:queue";
const STATUS_TTL_SECS: u64 = 86_400;

/// Work queue between the orchestrator and the worker pool
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, job: &ScanJob) -> ScannerResult<()>;

    /// Next job, or `None` once `timeout` elapses with the queue empty
    async fn pop(&self, timeout: Duration) -> ScannerResult<Option<ScanJob>>;

    /// Flag a job as cancelled for whichever worker holds it
    async fn request_cancel(&self, job_id: &str) -> ScannerResult<()>;

    async fn is_cancel_requested(&self, job_id: &str) -> ScannerResult<bool>;

    async fn publish_progress(&self, progress: &ScanProgress) -> ScannerResult<()>;

    /// Mirror a status change for status pollers
    async fn update_scan_status(&self, scan_id: Uuid, status: ScanStatus) -> ScannerResult<()>;
}

fn queue_err(context: &str, err: impl std::fmt::Display) -> ScannerError {
    ScannerError::Queue(format!("{}: {}", context, err))
}

#[derive(Clone)]
pub struct RedisQueue {
    pool: Pool,
}

impl RedisQueue {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .context("Failed to create Redis pool")?;

        // Test connection
        let mut conn = pool.get().await.context("Failed to get Redis connection")?;
        let _: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Failed to ping Redis")?;

        Ok(Self { pool })
    }

    async fn conn(&self) -> ScannerResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| queue_err("Failed to get Redis connection", e))
    }

    fn cancel_key(job_id: &str) -> String {
        format!("scan:job:{}:cancel", job_id)
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn push(&self, job: &ScanJob) -> ScannerResult<()> {
        let mut conn = self.conn().await?;
        let job_json = serde_json::to_string(job).map_err(|e| queue_err("Failed to serialize scan job", e))?;

        deadpool_redis::redis::cmd("LPUSH")
            .arg(QUEUE_KEY)
            .arg(job_json)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| queue_err("Failed to push scan job", e))?;

        debug!(scan_id = %job.scan_id, job_id = %job.job_id, "Pushed scan job");
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> ScannerResult<Option<ScanJob>> {
        let mut conn = self.conn().await?;

        // BRPOP scan:queue timeout
        let result: Option<(String, String)> = deadpool_redis::redis::cmd("BRPOP")
            .arg(QUEUE_KEY)
            .arg(timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| queue_err("Failed to pop from queue", e))?;

        match result {
            Some((_, job_json)) => {
                let job: ScanJob = serde_json::from_str(&job_json)
                    .map_err(|e| queue_err("Failed to deserialize scan job", e))?;
                debug!(scan_id = %job.scan_id, "Popped scan job");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn request_cancel(&self, job_id: &str) -> ScannerResult<()> {
        let mut conn = self.conn().await?;

        deadpool_redis::redis::cmd("SET")
            .arg(Self::cancel_key(job_id))
            .arg("1")
            .arg("EX")
            .arg(STATUS_TTL_SECS)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| queue_err("Failed to flag cancellation", e))?;

        Ok(())
    }

    async fn is_cancel_requested(&self, job_id: &str) -> ScannerResult<bool> {
        let mut conn = self.conn().await?;

        let exists: i64 = deadpool_redis::redis::cmd("EXISTS")
            .arg(Self::cancel_key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| queue_err("Failed to read cancellation flag", e))?;

        Ok(exists > 0)
    }

    /// Publish scan progress
    async fn publish_progress(&self, progress: &ScanProgress) -> ScannerResult<()> {
        let mut conn = self.conn().await?;
        let channel = format!("scan:{}:progress", progress.scan_id);
        let message = serde_json::to_string(progress).map_err(|e| queue_err("Failed to serialize progress", e))?;

        deadpool_redis::redis::cmd("PUBLISH")
            .arg(&channel)
            .arg(message)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| queue_err("Failed to publish progress", e))?;

        Ok(())
    }

    async fn update_scan_status(&self, scan_id: Uuid, status: ScanStatus) -> ScannerResult<()> {
        let mut conn = self.conn().await?;
        let key = format!("scan:{}:status", scan_id);

        deadpool_redis::redis::cmd("SET")
            .arg(&key)
            .arg(status.as_str())
            .arg("EX")
            .arg(STATUS_TTL_SECS)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| queue_err("Failed to update scan status", e))?;

        debug!(scan_id = %scan_id, status = %status, "Updated scan status");
        Ok(())
    }
}

/// In-process queue for single-node deployments and tests
pub struct MemoryQueue {
    jobs: Mutex<VecDeque<ScanJob>>,
    notify: Notify,
    cancelled: Mutex<HashSet<String>>,
    statuses: Mutex<HashMap<Uuid, ScanStatus>>,
    progress_tx: broadcast::Sender<ScanProgress>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(256);
        Self {
            jobs: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            cancelled: Mutex::new(HashSet::new()),
            statuses: Mutex::new(HashMap::new()),
            progress_tx,
        }
    }

    /// Progress stream, the in-process counterpart of the Redis channel
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub fn last_status(&self, scan_id: Uuid) -> Option<ScanStatus> {
        self.statuses.lock().get(&scan_id).copied()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn push(&self, job: &ScanJob) -> ScannerResult<()> {
        self.jobs.lock().push_back(job.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> ScannerResult<Option<ScanJob>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let next = self.jobs.lock().pop_front();
            if next.is_some() {
                return Ok(next);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified()).await.is_err() {
                let last_chance = self.jobs.lock().pop_front();
                return Ok(last_chance);
            }
        }
    }

    async fn request_cancel(&self, job_id: &str) -> ScannerResult<()> {
        self.cancelled.lock().insert(job_id.to_string());
        Ok(())
    }

    async fn is_cancel_requested(&self, job_id: &str) -> ScannerResult<bool> {
        Ok(self.cancelled.lock().contains(job_id))
    }

    async fn publish_progress(&self, progress: &ScanProgress) -> ScannerResult<()> {
        // No subscribers is fine
        let _ = self.progress_tx.send(progress.clone());
        Ok(())
    }

    async fn update_scan_status(&self, scan_id: Uuid, status: ScanStatus) -> ScannerResult<()> {
        self.statuses.lock().insert(scan_id, status);
        Ok(())
    }
}
