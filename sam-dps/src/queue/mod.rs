//! Persistent job queue
//!
//! Jobs live in the `jobs` table so work survives a restart. Each job type
//! has its own pool of worker tasks; a push wakes idle workers of that type
//! and otherwise they poll every `poll_rate_ms`.
//!
//! Failure policy:
//! - FILETYPE / APITYPE: retried after `base_delay_ms` while
//!   `retry_count < retries`, then FAILED
//! - DEFERTYPE: retried with exponential backoff up to `defer_max_attempts`,
//!   then written to `dead_letter_jobs` and FAILED
//!
//! Jobs pushed already FAILED are audit records and never run.

pub mod api_worker;
pub mod defer_worker;
pub mod file_worker;
pub mod finalize;

pub use api_worker::ApiWorker;
pub use defer_worker::DeferWorker;
pub use file_worker::FileWorker;
pub use finalize::UploadFinalizer;

use async_trait::async_trait;
use futures::FutureExt;
use sam_common::Result;
use sqlx::SqlitePool;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::db::jobs::{self, now_ms, ResumeSummary};
use crate::models::{Job, JobType, NewJob};
use crate::utils::retry_on_lock;

/// Handler for one job type
#[async_trait]
pub trait Worker: Send + Sync {
    fn job_type(&self) -> JobType;

    fn name(&self) -> &'static str;

    /// Run one job; an error schedules a retry or fails the job
    async fn work(&self, job: &Job) -> anyhow::Result<()>;
}

struct Wakers {
    file: Notify,
    api: Notify,
    defer: Notify,
}

impl Wakers {
    fn get(&self, job_type: JobType) -> &Notify {
        match job_type {
            JobType::File => &self.file,
            JobType::Api => &self.api,
            JobType::Defer => &self.defer,
        }
    }
}

/// Cloneable handle to the queue
#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    config: QueueConfig,
    max_lock_wait_ms: u64,
    wakers: Arc<Wakers>,
    cancel: CancellationToken,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, config: QueueConfig, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            config,
            max_lock_wait_ms,
            wakers: Arc::new(Wakers {
                file: Notify::new(),
                api: Notify::new(),
                defer: Notify::new(),
            }),
            cancel: CancellationToken::new(),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Attempts allowed before a job of `job_type` is terminal
    pub fn limit_for(&self, job_type: JobType) -> i64 {
        match job_type {
            JobType::Defer => self.config.defer_max_attempts,
            JobType::File | JobType::Api => self.config.retries,
        }
    }

    /// True when a failure of this job will not be retried
    pub fn is_last_attempt(&self, job: &Job) -> bool {
        let limit = self.limit_for(job.job_type);
        limit == 0 || job.retry_count >= limit
    }

    fn retry_delay(&self, job: &Job) -> Duration {
        match job.job_type {
            JobType::Defer => self.config.backoff(job.retry_count + 1),
            JobType::File | JobType::Api => Duration::from_millis(self.config.base_delay_ms),
        }
    }

    pub async fn push(&self, job: NewJob) -> Result<i64> {
        let job_type = job.job_type;
        let id = retry_on_lock("push_job", self.max_lock_wait_ms, || {
            jobs::insert_job(&self.pool, &job)
        })
        .await?;
        self.wakers.get(job_type).notify_one();
        Ok(id)
    }

    /// Insert a batch in one transaction
    pub async fn push_all(&self, batch: Vec<NewJob>) -> Result<Vec<i64>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let ids = retry_on_lock("push_jobs", self.max_lock_wait_ms, || {
            jobs::insert_jobs(&self.pool, &batch)
        })
        .await?;
        for job_type in JobType::ALL {
            if batch.iter().any(|j| j.job_type == job_type) {
                self.wakers.get(job_type).notify_waiters();
            }
        }
        Ok(ids)
    }

    /// Requeue jobs a previous process left unfinished
    pub async fn resume(&self) -> Result<ResumeSummary> {
        let summary = jobs::resume(&self.pool, |t| self.limit_for(t)).await?;
        if summary.requeued > 0 {
            tracing::info!(
                requeued = summary.requeued,
                clamped = summary.clamped,
                "Resumed unfinished jobs"
            );
        }
        Ok(summary)
    }

    /// Claim and run one job for `worker`; `false` when none was runnable
    pub async fn run_once(&self, worker: &dyn Worker) -> Result<bool> {
        let job_type = worker.job_type();
        let claimed = retry_on_lock("claim_job", self.max_lock_wait_ms, || {
            jobs::claim_next(&self.pool, job_type, now_ms())
        })
        .await?;
        let Some(job) = claimed else {
            return Ok(false);
        };

        tracing::debug!(
            job_id = job.job_id,
            worker = worker.name(),
            attempt = job.retry_count + 1,
            "Running job"
        );

        let outcome = AssertUnwindSafe(worker.work(&job)).catch_unwind().await;
        let error = match outcome {
            Ok(Ok(())) => {
                jobs::complete_job(&self.pool, job.job_id).await?;
                return Ok(true);
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => "InternalError: worker panicked".to_string(),
        };

        self.record_failure(&job, worker.name(), &error).await?;
        Ok(true)
    }

    async fn record_failure(&self, job: &Job, worker: &str, error: &str) -> Result<()> {
        if !self.is_last_attempt(job) {
            let delay = self.retry_delay(job);
            tracing::warn!(
                job_id = job.job_id,
                worker,
                attempt = job.retry_count + 1,
                delay_ms = delay.as_millis() as u64,
                error,
                "Job failed, will retry"
            );
            return jobs::retry_job(&self.pool, job.job_id, now_ms() + delay.as_millis() as i64, error)
                .await;
        }

        match job.job_type {
            JobType::Defer => {
                tracing::error!(
                    job_id = job.job_id,
                    attempts = job.retry_count + 1,
                    error,
                    "Deferred update exhausted, moving to dead letters"
                );
                jobs::dead_letter(&self.pool, job, error).await
            }
            JobType::File | JobType::Api => {
                tracing::error!(job_id = job.job_id, worker, error, "Job failed");
                jobs::fail_job(&self.pool, job.job_id, error).await
            }
        }
    }

    /// Start `count` tasks running `worker`
    pub async fn spawn_workers(&self, worker: Arc<dyn Worker>, count: usize) {
        let mut handles = self.handles.lock().await;
        for index in 0..count {
            let queue = self.clone();
            let worker = worker.clone();
            handles.push(tokio::spawn(async move {
                queue.worker_loop(worker, index).await;
            }));
        }
        tracing::info!(worker = worker.name(), count, "Workers started");
    }

    async fn worker_loop(self, worker: Arc<dyn Worker>, index: usize) {
        let poll = Duration::from_millis(self.config.poll_rate_ms.max(1));
        let waker = self.wakers.get(worker.job_type());

        while !self.cancel.is_cancelled() {
            match self.run_once(worker.as_ref()).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(worker = worker.name(), index, error = %e, "Queue error");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = waker.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
        tracing::debug!(worker = worker.name(), index, "Worker stopped");
    }

    /// Stop every worker after its current job
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }
        tracing::info!("Job queue stopped");
    }
}
