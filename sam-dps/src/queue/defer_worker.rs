//! DEFERTYPE worker: replay counter updates the API worker could not persist

use anyhow::Context;
use async_trait::async_trait;

use super::finalize::UploadFinalizer;
use super::{JobQueue, Worker};
use crate::db::uploads;
use crate::models::{DeferOutcome, DeferPayload, Job, JobType};

pub struct DeferWorker {
    queue: JobQueue,
    finalizer: UploadFinalizer,
}

impl DeferWorker {
    pub fn new(queue: JobQueue, finalizer: UploadFinalizer) -> Self {
        Self { queue, finalizer }
    }
}

#[async_trait]
impl Worker for DeferWorker {
    fn job_type(&self) -> JobType {
        JobType::Defer
    }

    fn name(&self) -> &'static str {
        "defer_worker"
    }

    async fn work(&self, job: &Job) -> anyhow::Result<()> {
        let payload: DeferPayload =
            serde_json::from_value(job.data.clone()).context("Invalid defer payload")?;
        let (success, failed) = match payload.outcome {
            DeferOutcome::Success => (payload.count, 0),
            DeferOutcome::Failed => (0, payload.count),
        };

        let finalized =
            uploads::update_counts(self.queue.pool(), payload.upload_id, success, failed).await?;
        tracing::info!(
            upload_id = payload.upload_id,
            outcome = payload.outcome.as_str(),
            count = payload.count,
            attempt = job.retry_count + 1,
            "Deferred counter update applied"
        );

        if let Some(status) = finalized {
            self.finalizer
                .finalize(
                    payload.upload_id,
                    &payload.file_name,
                    payload.global_file_id,
                    status,
                )
                .await;
        }
        Ok(())
    }
}
