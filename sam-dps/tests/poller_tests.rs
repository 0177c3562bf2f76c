//! Global upload hand-over by the poller

mod helpers;

use helpers::{create_test_db, seed_upload, test_config, FakeTransport};
use sam_dps::db::uploads::{self, UploadListQuery};
use sam_dps::models::{DataType, UploadStatus};
use sam_dps::queue::JobQueue;
use sam_dps::services::poller::CycleReport;
use sam_dps::services::{CoreFactorCache, IngestionOrchestrator, Poller, PollerState};
use sam_dps::storage::Storage;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SCOPE: &str = "SCOPE1";

async fn poller(wait_limit: u32) -> (TempDir, Poller, Storage) {
    let (dir, pool) = create_test_db().await.unwrap();
    let config = test_config(dir.path());
    let storage = Storage::new(config.storage.clone());
    let orchestrator = IngestionOrchestrator::new(
        JobQueue::new(pool, config.queue.clone(), 1_000),
        storage.clone(),
        Arc::new(FakeTransport::new()),
        Arc::new(CoreFactorCache::new()),
        &config.rpc,
    );
    let poller = Poller::new(
        orchestrator,
        storage.clone(),
        PollerState::new(),
        wait_limit,
        Duration::from_secs(1),
    );
    (dir, poller, storage)
}

fn touch(storage: &Storage, name: &str) {
    std::fs::write(storage.incoming_path(name), "application_id;version;owner;name;domain;flag\n")
        .unwrap();
}

#[tokio::test]
async fn no_global_uploads_is_a_quiet_cycle() {
    let (_dir, poller, _storage) = poller(3).await;

    let report = poller.run_cycle().await.unwrap();

    assert_eq!(report, CycleReport::default());
}

#[tokio::test]
async fn error_marker_fails_the_global_upload() {
    // Given
    let (_dir, poller, storage) = poller(3).await;
    let pool = poller_pool(&poller);
    let gid = seed_upload(&pool, SCOPE, DataType::GlobalData, "inv.xlsx", None).await;
    touch(&storage, &format!("{}.error", gid));

    // When
    let report = poller.run_cycle().await.unwrap();

    // Then
    assert_eq!(report.failed, 1);
    let global = uploads::get_upload(&pool, gid).await.unwrap().unwrap();
    assert_eq!(global.status, UploadStatus::Failed);
    assert_eq!(global.comments, "NifiInternalError");
}

#[tokio::test]
async fn missing_output_times_out_after_wait_limit() {
    let (_dir, poller, _storage) = poller(2).await;
    let pool = poller_pool(&poller);
    let gid = seed_upload(&pool, SCOPE, DataType::GlobalData, "inv.xlsx", None).await;

    // Two empty cycles are tolerated
    for expected in 1..=2 {
        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.waiting, 1);
        assert_eq!(poller.state().waits(gid).await, expected);
    }

    // The third gives up
    let report = poller.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);
    let global = uploads::get_upload(&pool, gid).await.unwrap().unwrap();
    assert_eq!(global.status, UploadStatus::Failed);
    assert_eq!(global.comments, "NifiTimeout");
    assert_eq!(poller.state().waits(gid).await, 0);
}

#[tokio::test]
async fn transformed_files_are_handed_to_ingestion() {
    // Given: a global upload and its transformed applications file
    let (_dir, poller, storage) = poller(3).await;
    let pool = poller_pool(&poller);
    let gid = seed_upload(&pool, SCOPE, DataType::GlobalData, "inv.xlsx", None).await;
    let name = format!("{}_SCOPE1_applications.csv", gid);
    touch(&storage, &name);

    // When
    let report = poller.run_cycle().await.unwrap();

    // Then: global PROCESSED, file marked and recorded as a linked data upload
    assert_eq!(report.triggered, 1);
    let global = uploads::get_upload(&pool, gid).await.unwrap().unwrap();
    assert_eq!(global.status, UploadStatus::Processed);

    let marked = format!("PROCESSING#{}", name);
    assert!(storage.incoming_path(&marked).exists());
    assert!(!storage.incoming_path(&name).exists());

    let page = uploads::list_uploads(&pool, SCOPE, DataType::Data, &UploadListQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total_records, 1);
    assert_eq!(page.items[0].file_name, marked);
    assert_eq!(page.items[0].global_file_id, Some(gid));
    assert_eq!(page.items[0].uploaded_by, "Nifi");

    // And: a processed global upload is not polled again
    assert_eq!(poller.run_cycle().await.unwrap(), CycleReport::default());
}

#[tokio::test]
async fn refused_hand_over_is_undone() {
    // Given: the transformed file belongs to a superseded global upload
    let (_dir, poller, storage) = poller(3).await;
    let pool = poller_pool(&poller);
    let stale = seed_upload(&pool, SCOPE, DataType::GlobalData, "old.xlsx", None).await;
    let active = seed_upload(&pool, SCOPE, DataType::GlobalData, "new.xlsx", None).await;
    let name = format!("{}_SCOPE1_applications.csv", stale);
    touch(&storage, &name);

    // When
    let report = poller.run_cycle().await.unwrap();

    // Then: nothing triggered, the name and status are restored
    assert_eq!(report.triggered, 0);
    assert_eq!(report.waiting, 1);
    assert!(storage.incoming_path(&name).exists());
    let global = uploads::get_upload(&pool, stale).await.unwrap().unwrap();
    assert_eq!(global.status, UploadStatus::Pending);
    assert_eq!(poller.state().waits(active).await, 1);
}

#[tokio::test]
async fn failed_rename_undoes_the_hand_over() {
    // Given: two transformed files, one of which cannot take the marker
    let (_dir, poller, storage) = poller(3).await;
    let pool = poller_pool(&poller);
    let gid = seed_upload(&pool, SCOPE, DataType::GlobalData, "inv.xlsx", None).await;
    let applications = format!("{}_SCOPE1_applications.csv", gid);
    let products = format!("{}_SCOPE1_products.csv", gid);
    touch(&storage, &applications);
    touch(&storage, &products);
    std::fs::create_dir(storage.incoming_path(&format!("PROCESSING#{}", products))).unwrap();

    // When
    let report = poller.run_cycle().await.unwrap();

    // Then: nothing is notified and both files keep their names
    assert_eq!(report.triggered, 0);
    assert!(storage.incoming_path(&applications).exists());
    assert!(storage.incoming_path(&products).is_file());
    assert!(!storage
        .incoming_path(&format!("PROCESSING#{}", applications))
        .exists());
    let page = uploads::list_uploads(&pool, SCOPE, DataType::Data, &UploadListQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total_records, 0);

    // And: the global upload is polled again next cycle
    let global = uploads::get_upload(&pool, gid).await.unwrap().unwrap();
    assert_eq!(global.status, UploadStatus::Pending);
    std::fs::remove_dir(storage.incoming_path(&format!("PROCESSING#{}", products))).unwrap();
    assert_eq!(poller.run_cycle().await.unwrap().triggered, 1);
}

fn poller_pool(poller: &Poller) -> sqlx::SqlitePool {
    poller.orchestrator().pool().clone()
}
