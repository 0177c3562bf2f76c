//! Job queue retry, dead-letter and resume behaviour
//!
//! Workers are driven one claim at a time through `run_once` so every
//! attempt is observable.

mod helpers;

use async_trait::async_trait;
use helpers::{create_test_db, seed_upload, test_config, FakeTransport};
use sam_dps::config::QueueConfig;
use sam_dps::db::{jobs, uploads};
use sam_dps::models::{
    DataType, DeferOutcome, DeferPayload, Envelope, Job, JobStatus, JobType, NewJob, TargetAction,
    TargetRpc, TargetService, UploadStatus,
};
use sam_dps::queue::{ApiWorker, DeferWorker, JobQueue, UploadFinalizer, Worker};
use sam_dps::services::RpcMethod;
use sam_dps::storage::Storage;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

fn immediate_queue(pool: &SqlitePool, retries: i64, defer_max_attempts: i64) -> JobQueue {
    let config = QueueConfig {
        poll_rate_ms: 10,
        retries,
        base_delay_ms: 0,
        defer_max_attempts,
        defer_backoff_cap_ms: 0,
    };
    JobQueue::new(pool.clone(), config, 1_000)
}

fn api_worker(
    queue: &JobQueue,
    storage: Storage,
    transport: Arc<FakeTransport>,
) -> ApiWorker {
    let finalizer = UploadFinalizer::new(
        queue.pool().clone(),
        storage,
        transport.clone(),
        Duration::from_secs(1),
    );
    ApiWorker::new(queue.clone(), transport, finalizer, Duration::from_secs(1), 1_000)
}

fn product_links(upload_id: i64, application_ids: &[&str]) -> Envelope {
    Envelope {
        data: json!({
            "swid_tag": "P1",
            "scope": "SCOPE1",
            "applications": { "operation": "add", "application_id": application_ids },
        }),
        target_service: TargetService::Product,
        target_action: TargetAction::Upsert,
        target_rpc: TargetRpc::ApplicationsProducts,
        file_name: "SCOPE1_products_applications.csv".to_string(),
        transformed_file_name: String::new(),
        upload_id,
        global_file_id: None,
    }
}

fn product(upload_id: i64, swid_tag: &str) -> Envelope {
    Envelope {
        data: json!({ "swid_tag": swid_tag, "scope": "SCOPE1" }),
        target_service: TargetService::Product,
        target_action: TargetAction::Upsert,
        target_rpc: TargetRpc::Products,
        file_name: "SCOPE1_products_applications.csv".to_string(),
        transformed_file_name: String::new(),
        upload_id,
        global_file_id: None,
    }
}

async fn push_envelope(queue: &JobQueue, envelope: &Envelope) -> i64 {
    let data = serde_json::to_value(envelope).unwrap();
    queue.push(NewJob::pending(JobType::Api, data)).await.unwrap()
}

/// Run claims until none is runnable; returns the number of attempts
async fn drain(queue: &JobQueue, worker: &dyn Worker) -> usize {
    let mut attempts = 0;
    while queue.run_once(worker).await.unwrap() {
        attempts += 1;
        assert!(attempts < 50, "queue never drained");
    }
    attempts
}

#[tokio::test]
async fn exhausted_api_job_counts_its_records_once() {
    // Given: a three-record file whose product service is down
    let (dir, pool) = create_test_db().await.unwrap();
    let storage = Storage::new(test_config(dir.path()).storage);
    let upload_id = seed_upload(&pool, "SCOPE1", DataType::Data, "SCOPE1_products_applications.csv", None).await;
    uploads::update_total_and_failed(&pool, upload_id, 3, 0).await.unwrap();

    let queue = immediate_queue(&pool, 2, 2);
    let transport = Arc::new(FakeTransport::failing(&[RpcMethod::UpsertProduct]));
    let worker = api_worker(&queue, storage, transport.clone());
    let job_id = push_envelope(&queue, &product_links(upload_id, &["A1", "A2"])).await;

    // When: the job runs until the queue gives up
    let attempts = drain(&queue, &worker).await;

    // Then: one first attempt plus two retries, then FAILED
    assert_eq!(attempts, 3);
    assert_eq!(transport.count(RpcMethod::UpsertProduct), 3);
    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.comments.contains("down"), "comments: {}", job.comments);

    // And: both linked applications are failed records, counted exactly once
    let record = uploads::get_upload(&pool, upload_id).await.unwrap().unwrap();
    assert_eq!(record.failed_records, 2);
    assert_eq!(record.success_records, 0);
    assert_eq!(record.status, UploadStatus::InProgress);
}

#[tokio::test]
async fn last_record_finalizes_partial_file() {
    // Given: two records already failed on a three-record file
    let (dir, pool) = create_test_db().await.unwrap();
    let storage = Storage::new(test_config(dir.path()).storage);
    let upload_id = seed_upload(&pool, "SCOPE1", DataType::Data, "SCOPE1_products_applications.csv", None).await;
    uploads::update_total_and_failed(&pool, upload_id, 3, 2).await.unwrap();
    std::fs::write(storage.incoming_path("SCOPE1_products_applications.csv"), "x").unwrap();

    let queue = immediate_queue(&pool, 1, 1);
    let transport = Arc::new(FakeTransport::new());
    let worker = api_worker(&queue, storage.clone(), transport.clone());
    push_envelope(&queue, &product(upload_id, "P1")).await;

    // When
    drain(&queue, &worker).await;

    // Then: counters cover the file, it is PARTIAL and archived
    let record = uploads::get_upload(&pool, upload_id).await.unwrap().unwrap();
    assert_eq!(record.success_records, 1);
    assert_eq!(record.status, UploadStatus::Partial);
    assert!(storage
        .archive_path(upload_id, "SCOPE1_products_applications.csv")
        .exists());
}

#[tokio::test]
async fn recovered_service_succeeds_on_retry() {
    let (dir, pool) = create_test_db().await.unwrap();
    let storage = Storage::new(test_config(dir.path()).storage);
    let upload_id = seed_upload(&pool, "SCOPE1", DataType::Data, "SCOPE1_products_applications.csv", None).await;
    uploads::update_total_and_failed(&pool, upload_id, 1, 0).await.unwrap();

    let queue = immediate_queue(&pool, 3, 1);
    let transport = Arc::new(FakeTransport::failing(&[RpcMethod::UpsertProduct]));
    let worker = api_worker(&queue, storage, transport.clone());
    let job_id = push_envelope(&queue, &product(upload_id, "P1")).await;

    // First attempt fails and schedules a retry without counting anything
    assert!(queue.run_once(&worker).await.unwrap());
    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Retry);
    assert_eq!(job.retry_count, 1);
    let record = uploads::get_upload(&pool, upload_id).await.unwrap().unwrap();
    assert_eq!(record.failed_records, 0);

    transport.recover();
    drain(&queue, &worker).await;

    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let record = uploads::get_upload(&pool, upload_id).await.unwrap().unwrap();
    assert_eq!(record.status, UploadStatus::Success);
}

#[tokio::test]
async fn drop_envelopes_never_touch_counters() {
    let (dir, pool) = create_test_db().await.unwrap();
    let storage = Storage::new(test_config(dir.path()).storage);
    let upload_id = seed_upload(&pool, "SCOPE1", DataType::Data, "SCOPE1_products.csv", None).await;
    uploads::update_total_and_failed(&pool, upload_id, 5, 0).await.unwrap();

    let queue = immediate_queue(&pool, 0, 1);
    let transport = Arc::new(FakeTransport::failing(&[RpcMethod::DropProductData]));
    let worker = api_worker(&queue, storage, transport);
    let mut envelope = product(upload_id, "P1");
    envelope.target_action = TargetAction::Drop;
    push_envelope(&queue, &envelope).await;

    drain(&queue, &worker).await;

    let record = uploads::get_upload(&pool, upload_id).await.unwrap().unwrap();
    assert_eq!(record.failed_records, 0);
    assert_eq!(record.success_records, 0);
}

#[tokio::test]
async fn exhausted_defer_job_is_dead_lettered() {
    // Given: a deferred update for an upload that does not exist
    let (dir, pool) = create_test_db().await.unwrap();
    let storage = Storage::new(test_config(dir.path()).storage);
    let queue = immediate_queue(&pool, 1, 2);
    let finalizer = UploadFinalizer::new(
        pool.clone(),
        storage,
        Arc::new(FakeTransport::new()),
        Duration::from_secs(1),
    );
    let worker = DeferWorker::new(queue.clone(), finalizer);
    let payload = DeferPayload {
        upload_id: 9_999,
        file_name: "SCOPE1_products.csv".to_string(),
        outcome: DeferOutcome::Success,
        count: 1,
        global_file_id: None,
    };
    let job_id = queue
        .push(NewJob::pending(JobType::Defer, serde_json::to_value(&payload).unwrap()))
        .await
        .unwrap();

    // When
    let attempts = drain(&queue, &worker).await;

    // Then
    assert_eq!(attempts, 3);
    assert_eq!(jobs::count_dead_letters(&pool).await.unwrap(), 1);
    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn audit_records_are_never_claimed() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let queue = immediate_queue(&pool, 1, 1);
    queue
        .push(NewJob::audit(JobType::Api, json!({"line": 4}), "InvalidLine"))
        .await
        .unwrap();

    let claimed = jobs::claim_next(&pool, JobType::Api, jobs::now_ms()).await.unwrap();

    assert!(claimed.is_none());
}

struct PanickingWorker;

#[async_trait]
impl Worker for PanickingWorker {
    fn job_type(&self) -> JobType {
        JobType::File
    }

    fn name(&self) -> &'static str {
        "panicking_worker"
    }

    async fn work(&self, _job: &Job) -> anyhow::Result<()> {
        panic!("boom");
    }
}

#[tokio::test]
async fn worker_panic_fails_the_job() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let queue = immediate_queue(&pool, 0, 1);
    let job_id = queue
        .push(NewJob::pending(JobType::File, json!({})))
        .await
        .unwrap();

    assert!(queue.run_once(&PanickingWorker).await.unwrap());

    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.comments.contains("panicked"));
}

#[tokio::test]
async fn resume_requeues_every_unfinished_job() {
    // Given: a job interrupted mid-run and one waiting for its last attempt
    let (_dir, pool) = create_test_db().await.unwrap();
    let queue = immediate_queue(&pool, 2, 1);
    let interrupted = queue.push(NewJob::pending(JobType::Api, json!({}))).await.unwrap();
    let last_attempt = queue.push(NewJob::pending(JobType::Api, json!({}))).await.unwrap();
    jobs::claim_next(&pool, JobType::Api, jobs::now_ms()).await.unwrap().unwrap();
    sqlx::query("UPDATE jobs SET status = 'RETRY', retry_count = 2 WHERE job_id = ?")
        .bind(last_attempt)
        .execute(&pool)
        .await
        .unwrap();

    // When: a new process resumes the queue
    let summary = queue.resume().await.unwrap();

    // Then: both run again, the second still on its last attempt
    assert_eq!(summary.requeued, 2);
    assert_eq!(summary.clamped, 0);
    let job = jobs::get_job(&pool, interrupted).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    let job = jobs::get_job(&pool, last_attempt).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 2);
    assert!(queue.is_last_attempt(&job));
}

#[tokio::test]
async fn resumed_last_attempt_counts_failed_records() {
    // Given: a two-record file whose only job awaits its last attempt
    let (dir, pool) = create_test_db().await.unwrap();
    let storage = Storage::new(test_config(dir.path()).storage);
    let upload_id = seed_upload(&pool, "SCOPE1", DataType::Data, "SCOPE1_products_applications.csv", None).await;
    uploads::update_total_and_failed(&pool, upload_id, 2, 0).await.unwrap();

    let queue = immediate_queue(&pool, 2, 1);
    let job_id = push_envelope(&queue, &product_links(upload_id, &["A1", "A2"])).await;
    sqlx::query("UPDATE jobs SET status = 'RETRY', retry_count = 2 WHERE job_id = ?")
        .bind(job_id)
        .execute(&pool)
        .await
        .unwrap();

    // When: the queue resumes and the product service is still down
    queue.resume().await.unwrap();
    let transport = Arc::new(FakeTransport::failing(&[RpcMethod::UpsertProduct]));
    let worker = api_worker(&queue, storage, transport.clone());
    let attempts = drain(&queue, &worker).await;

    // Then: one final attempt, both links counted, the file is finished
    assert_eq!(attempts, 1);
    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let record = uploads::get_upload(&pool, upload_id).await.unwrap().unwrap();
    assert_eq!(record.failed_records, 2);
    assert_eq!(record.status, UploadStatus::Failed);
}

#[tokio::test]
async fn resume_without_retries_keeps_pending_jobs() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let queue = immediate_queue(&pool, 0, 1);
    let job_id = queue.push(NewJob::pending(JobType::Api, json!({}))).await.unwrap();

    let summary = queue.resume().await.unwrap();

    assert_eq!(summary.requeued, 1);
    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
}

#[tokio::test]
async fn resume_clamps_jobs_past_a_lowered_limit() {
    // Given: a job retried three times under an older, higher limit
    let (_dir, pool) = create_test_db().await.unwrap();
    let queue = immediate_queue(&pool, 1, 1);
    let job_id = queue.push(NewJob::pending(JobType::Api, json!({}))).await.unwrap();
    sqlx::query("UPDATE jobs SET status = 'RETRY', retry_count = 3 WHERE job_id = ?")
        .bind(job_id)
        .execute(&pool)
        .await
        .unwrap();

    // When
    let summary = queue.resume().await.unwrap();

    // Then: it gets exactly one more attempt
    assert_eq!(summary.clamped, 1);
    let job = jobs::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);
    assert!(queue.is_last_attempt(&job));
}
