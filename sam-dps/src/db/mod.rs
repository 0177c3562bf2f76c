//! Database access for sam-dps
//!
//! Owns the upload, deletion audit, job queue and core-factor tables. All
//! timestamps are stored as RFC 3339 text.

pub mod core_factor;
pub mod deletions;
pub mod jobs;
pub mod uploads;

use chrono::{DateTime, Utc};
use sam_common::db::{open_pool, run_migrations, Migration};
use sam_common::{Error, Result};
use sqlx::SqlitePool;
use std::path::Path;

/// Component name recorded in `schema_version`
pub const COMPONENT: &str = "sam-dps";

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "uploads, deletions and jobs",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS uploaded_files (
                upload_id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope TEXT NOT NULL,
                data_type TEXT NOT NULL,
                file_name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                uploaded_by TEXT NOT NULL,
                uploaded_on TEXT NOT NULL,
                total_records INTEGER NOT NULL DEFAULT 0,
                success_records INTEGER NOT NULL DEFAULT 0,
                failed_records INTEGER NOT NULL DEFAULT 0,
                comments TEXT NOT NULL DEFAULT '',
                global_file_id INTEGER,
                scope_type TEXT NOT NULL DEFAULT 'GENERIC',
                analysis_id TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_uploaded_files_scope ON uploaded_files(scope, status)",
            "CREATE INDEX IF NOT EXISTS idx_uploaded_files_global ON uploaded_files(global_file_id)",
            r#"
            CREATE TABLE IF NOT EXISTS deletion_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope TEXT NOT NULL,
                deletion_type TEXT NOT NULL,
                status TEXT NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                created_by TEXT NOT NULL,
                created_on TEXT NOT NULL,
                updated_on TEXT NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_deletion_audit_active
            ON deletion_audit(scope) WHERE status = 'INPROGRESS'
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_type TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL,
                comments TEXT NOT NULL DEFAULT '',
                retry_count INTEGER NOT NULL DEFAULT 0,
                not_before INTEGER NOT NULL DEFAULT 0,
                start_time TEXT,
                end_time TEXT,
                created_on TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(job_type, status, not_before)",
            r#"
            CREATE TABLE IF NOT EXISTS dead_letter_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                job_type TEXT NOT NULL,
                data TEXT NOT NULL,
                reason TEXT NOT NULL,
                retry_count INTEGER NOT NULL,
                created_on TEXT NOT NULL
            )
            "#,
        ],
    },
    Migration {
        version: 2,
        description: "core factor reference",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS core_factor_references (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                manufacturer TEXT NOT NULL,
                model TEXT NOT NULL,
                core_factor TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS core_factor_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_name TEXT NOT NULL,
                uploaded_on TEXT NOT NULL
            )
            "#,
        ],
    },
];

/// Open the database and bring the schema up to date
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = open_pool(db_path).await?;
    run_migrations(&pool, COMPONENT, MIGRATIONS).await?;
    tracing::info!(path = %db_path.display(), "sam-dps database ready");
    Ok(pool)
}

/// Parse a stored RFC 3339 timestamp
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", raw, e)))
}

pub(crate) fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

/// One page of a listing together with the unpaged count
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub total_records: i64,
    pub items: Vec<T>,
}

/// Clamp page parameters; returns (limit, offset)
pub fn page_bounds(page_num: i64, page_size: i64) -> (i64, i64) {
    let size = if page_size <= 0 { 50 } else { page_size.min(200) };
    let num = page_num.max(1);
    (size, (num - 1) * size)
}
