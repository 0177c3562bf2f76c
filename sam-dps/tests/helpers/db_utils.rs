//! Database Test Utilities

use anyhow::Result;
use sam_dps::config::DpsConfig;
use sam_dps::db::uploads;
use sam_dps::models::{DataType, NewUpload, ScopeType, UploadRecord, UploadStatus};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Create temporary test database with all tables
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_sam_dps.db");
    let pool = sam_dps::db::init_database_pool(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Configuration rooted in `root` with fast queue timings
pub fn test_config(root: &Path) -> DpsConfig {
    let mut config = DpsConfig::rooted_at(root);
    config.queue.poll_rate_ms = 10;
    config.queue.base_delay_ms = 10;
    config.queue.defer_backoff_cap_ms = 50;
    config.rpc.timeout_ms = 1_000;
    config.rpc.equipment_drop_timeout_ms = 5_000;
    for dir in [
        &config.storage.files_location,
        &config.storage.archive_location,
        &config.storage.rawdata_location,
    ] {
        std::fs::create_dir_all(dir).unwrap();
    }
    config
}

/// Insert an upload row directly
pub async fn seed_upload(
    pool: &SqlitePool,
    scope: &str,
    data_type: DataType,
    file_name: &str,
    global_file_id: Option<i64>,
) -> i64 {
    let upload = NewUpload {
        scope: scope.to_string(),
        data_type,
        file_name: file_name.to_string(),
        uploaded_by: "admin@test.com".to_string(),
        global_file_id,
        scope_type: ScopeType::Generic,
        analysis_id: None,
    };
    uploads::insert_upload_if_no_deletion(pool, &upload)
        .await
        .unwrap()
        .expect("upload admitted")
}

/// Poll until the upload reaches `status` or five seconds pass
pub async fn wait_for_status(
    pool: &SqlitePool,
    upload_id: i64,
    status: UploadStatus,
) -> UploadRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record = uploads::get_upload(pool, upload_id).await.unwrap().unwrap();
        if record.status == status || tokio::time::Instant::now() >= deadline {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_test_db() {
        let (_temp_dir, pool) = create_test_db().await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        for table in ["uploaded_files", "jobs", "deletion_audit", "core_factor_references"] {
            assert!(tables.iter().any(|t| t == table), "missing table {}", table);
        }
    }
}
