//! APITYPE worker: deliver one envelope to its downstream service
//!
//! Non-DROP envelopes count toward the owning file's success or failed
//! records. A failure is counted only on the job's last attempt. When the
//! counter update itself fails, the update is handed to the defer worker.

use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::finalize::UploadFinalizer;
use super::{JobQueue, Worker};
use crate::db::uploads;
use crate::models::{DeferOutcome, DeferPayload, Envelope, Job, JobType, NewJob, TargetAction};
use crate::parser::payload_count;
use crate::services::rpc::{route, RpcError, RpcTransport};
use crate::utils::retry_on_lock;

pub struct ApiWorker {
    queue: JobQueue,
    transport: Arc<dyn RpcTransport>,
    finalizer: UploadFinalizer,
    timeout: Duration,
    max_lock_wait_ms: u64,
}

impl ApiWorker {
    pub fn new(
        queue: JobQueue,
        transport: Arc<dyn RpcTransport>,
        finalizer: UploadFinalizer,
        timeout: Duration,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            queue,
            transport,
            finalizer,
            timeout,
            max_lock_wait_ms,
        }
    }

    async fn call(&self, envelope: &Envelope) -> Result<(), RpcError> {
        let method = route(envelope.target_rpc, envelope.target_action).ok_or_else(|| {
            RpcError::NotSupported(format!(
                "{} {:?}",
                envelope.target_rpc.as_str(),
                envelope.target_action
            ))
        })?;
        self.transport
            .invoke(method, &envelope.data, self.timeout)
            .await
            .map(|_| ())
    }

    /// Add `count` records to the file counters, deferring on failure
    async fn record(&self, envelope: &Envelope, outcome: DeferOutcome, count: i64) {
        let (success, failed) = match outcome {
            DeferOutcome::Success => (count, 0),
            DeferOutcome::Failed => (0, count),
        };
        let pool = self.queue.pool();
        let updated = retry_on_lock("update_counts", self.max_lock_wait_ms, || {
            uploads::update_counts(pool, envelope.upload_id, success, failed)
        })
        .await;

        match updated {
            Ok(Some(status)) => {
                self.finalizer
                    .finalize(
                        envelope.upload_id,
                        &envelope.file_name,
                        envelope.global_file_id,
                        status,
                    )
                    .await;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    upload_id = envelope.upload_id,
                    outcome = outcome.as_str(),
                    error = %e,
                    "Counter update failed, deferring"
                );
                let payload = DeferPayload {
                    upload_id: envelope.upload_id,
                    file_name: envelope.file_name.clone(),
                    outcome,
                    count,
                    global_file_id: envelope.global_file_id,
                };
                let job = match serde_json::to_value(&payload) {
                    Ok(data) => NewJob::pending(JobType::Defer, data).with_comments(outcome.as_str()),
                    Err(e) => {
                        tracing::error!(error = %e, "Cannot encode deferred update");
                        return;
                    }
                };
                if let Err(e) = self.queue.push(job).await {
                    tracing::error!(
                        upload_id = envelope.upload_id,
                        error = %e,
                        "Lost counter update: defer job could not be queued"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl Worker for ApiWorker {
    fn job_type(&self) -> JobType {
        JobType::Api
    }

    fn name(&self) -> &'static str {
        "api_worker"
    }

    async fn work(&self, job: &Job) -> anyhow::Result<()> {
        let envelope: Envelope =
            serde_json::from_value(job.data.clone()).context("Invalid envelope")?;
        let counted = envelope.target_action != TargetAction::Drop;
        let count = if counted { payload_count(&envelope) } else { 0 };

        match self.call(&envelope).await {
            Ok(()) => {
                if counted {
                    self.record(&envelope, DeferOutcome::Success, count).await;
                }
                Ok(())
            }
            Err(e) => {
                if counted && self.queue.is_last_attempt(job) {
                    tracing::warn!(
                        job_id = job.job_id,
                        upload_id = envelope.upload_id,
                        records = count,
                        "Retries exhausted, counting records as failed"
                    );
                    self.record(&envelope, DeferOutcome::Failed, count).await;
                }
                Err(e.into())
            }
        }
    }
}
