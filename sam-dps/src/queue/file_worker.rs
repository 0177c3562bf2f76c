//! FILETYPE worker: parse an uploaded file and fan it out as API jobs

use anyhow::Context;
use async_trait::async_trait;

use super::finalize::UploadFinalizer;
use super::{JobQueue, Worker};
use crate::db::uploads;
use crate::models::{AuditRecord, FileJobPayload, Job, JobType, NewJob, UploadStatus};
use crate::parser::{build_envelopes, FileParser};
use crate::storage::archive_quietly;

pub struct FileWorker {
    queue: JobQueue,
    parser: FileParser,
    finalizer: UploadFinalizer,
}

impl FileWorker {
    pub fn new(queue: JobQueue, parser: FileParser, finalizer: UploadFinalizer) -> Self {
        Self {
            queue,
            parser,
            finalizer,
        }
    }
}

#[async_trait]
impl Worker for FileWorker {
    fn job_type(&self) -> JobType {
        JobType::File
    }

    fn name(&self) -> &'static str {
        "file_worker"
    }

    async fn work(&self, job: &Job) -> anyhow::Result<()> {
        let payload: FileJobPayload =
            serde_json::from_value(job.data.clone()).context("Invalid file job payload")?;
        let pool = self.queue.pool();
        let upload_id = payload.upload_id;

        uploads::update_status(pool, upload_id, UploadStatus::InProgress, "").await?;

        let parser = self.parser.clone();
        let (file_name, scope) = (payload.file_name.clone(), payload.scope.clone());
        let parsed = tokio::task::spawn_blocking(move || parser.parse(&file_name, &scope))
            .await
            .context("Parser task failed")?;

        let data = match parsed {
            Ok(data) => data,
            Err(failure) => {
                tracing::warn!(
                    upload_id,
                    file_name = %payload.file_name,
                    reason = %failure,
                    "File rejected"
                );
                uploads::update_status(pool, upload_id, UploadStatus::Failed, &failure.reason())
                    .await?;
                if self.queue.is_last_attempt(job) {
                    archive_quietly(self.finalizer.storage(), upload_id, &payload.file_name);
                }
                return Err(failure.into());
            }
        };

        let envelopes = build_envelopes(&data, upload_id, payload.global_file_id)?;

        let status =
            uploads::update_total_and_failed(pool, upload_id, data.total_count, data.failed_count())
                .await?;

        let mut batch = Vec::with_capacity(
            envelopes.len() + data.invalid_rows.len() + data.duplicates.len(),
        );
        for envelope in &envelopes {
            batch.push(NewJob::pending(JobType::Api, serde_json::to_value(envelope)?));
        }
        for line in &data.invalid_rows {
            let record = AuditRecord::invalid_line(upload_id, &payload.file_name, &payload.scope, *line);
            batch.push(NewJob::audit(JobType::Api, serde_json::to_value(record)?, "InsufficentData"));
        }
        for duplicate in &data.duplicates {
            let record =
                AuditRecord::duplicate(upload_id, &payload.file_name, &payload.scope, duplicate.clone());
            batch.push(NewJob::audit(JobType::Api, serde_json::to_value(record)?, "DuplicateRecord"));
        }
        self.queue.push_all(batch).await?;

        tracing::info!(
            upload_id,
            file_name = %payload.file_name,
            api_jobs = envelopes.len(),
            invalid = data.invalid_count(),
            duplicates = data.duplicates.len(),
            "File processed"
        );

        if status == UploadStatus::Failed {
            self.finalizer
                .finalize(upload_id, &payload.file_name, payload.global_file_id, status)
                .await;
            return Ok(());
        }

        // API workers may already have finalized the file
        if let Err(e) = uploads::transition_status(
            pool,
            upload_id,
            UploadStatus::InProgress,
            UploadStatus::Completed,
        )
        .await
        {
            tracing::warn!(upload_id, error = %e, "Failed to mark file COMPLETED");
        }

        Ok(())
    }
}
