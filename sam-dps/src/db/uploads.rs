//! Uploaded file records
//!
//! Counter updates and terminal status decisions run in one transaction so
//! concurrent API workers cannot both finalize, or both miss, a file.

use chrono::Utc;
use sam_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{page_bounds, parse_timestamp, Page};
use crate::models::{DataType, NewUpload, ScopeType, UploadRecord, UploadStatus};

const UPLOAD_COLUMNS: &str = "upload_id, scope, data_type, file_name, status, uploaded_by, \
     uploaded_on, total_records, success_records, failed_records, comments, global_file_id, \
     scope_type, analysis_id";

/// Statuses during which a scope counts as having an active injection
pub const ACTIVE_INJECTION_STATUSES: &str =
    "('PENDING', 'INPROGRESS', 'UPLOADED', 'PROCESSED', 'COMPLETED')";

fn row_to_upload(row: &SqliteRow) -> Result<UploadRecord> {
    let data_type: String = row.get("data_type");
    let status: String = row.get("status");
    let scope_type: String = row.get("scope_type");
    let uploaded_on: String = row.get("uploaded_on");

    Ok(UploadRecord {
        upload_id: row.get("upload_id"),
        scope: row.get("scope"),
        data_type: DataType::parse(&data_type)
            .ok_or_else(|| Error::Internal(format!("Unknown data type '{}'", data_type)))?,
        file_name: row.get("file_name"),
        status: UploadStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown upload status '{}'", status)))?,
        uploaded_by: row.get("uploaded_by"),
        uploaded_on: parse_timestamp(&uploaded_on)?,
        total_records: row.get("total_records"),
        success_records: row.get("success_records"),
        failed_records: row.get("failed_records"),
        comments: row.get("comments"),
        global_file_id: row.get("global_file_id"),
        scope_type: ScopeType::parse(&scope_type).unwrap_or_default(),
        analysis_id: row.get("analysis_id"),
    })
}

/// Insert a PENDING upload unless a deletion is running for the scope
///
/// Returns `None` when the deletion guard rejected the row.
pub async fn insert_upload_if_no_deletion(
    pool: &SqlitePool,
    upload: &NewUpload,
) -> Result<Option<i64>> {
    let result = sqlx::query(
        r#"
        INSERT INTO uploaded_files
            (scope, data_type, file_name, status, uploaded_by, uploaded_on,
             global_file_id, scope_type, analysis_id)
        SELECT ?, ?, ?, 'PENDING', ?, ?, ?, ?, ?
        WHERE NOT EXISTS (
            SELECT 1 FROM deletion_audit WHERE scope = ? AND status = 'INPROGRESS'
        )
        "#,
    )
    .bind(&upload.scope)
    .bind(upload.data_type.as_str())
    .bind(&upload.file_name)
    .bind(&upload.uploaded_by)
    .bind(Utc::now().to_rfc3339())
    .bind(upload.global_file_id)
    .bind(upload.scope_type.as_str())
    .bind(&upload.analysis_id)
    .bind(&upload.scope)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    Ok(Some(result.last_insert_rowid()))
}

pub async fn get_upload(pool: &SqlitePool, upload_id: i64) -> Result<Option<UploadRecord>> {
    let sql = format!("SELECT {} FROM uploaded_files WHERE upload_id = ?", UPLOAD_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(upload_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_upload).transpose()
}

pub async fn update_status(
    pool: &SqlitePool,
    upload_id: i64,
    status: UploadStatus,
    comments: &str,
) -> Result<()> {
    sqlx::query("UPDATE uploaded_files SET status = ?, comments = ? WHERE upload_id = ?")
        .bind(status.as_str())
        .bind(comments)
        .bind(upload_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Move from `from` to `to` only if the file still holds `from`
pub async fn transition_status(
    pool: &SqlitePool,
    upload_id: i64,
    from: UploadStatus,
    to: UploadStatus,
) -> Result<bool> {
    let result = sqlx::query("UPDATE uploaded_files SET status = ? WHERE upload_id = ? AND status = ?")
        .bind(to.as_str())
        .bind(upload_id)
        .bind(from.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Record parse totals; a file whose every record failed is finalized FAILED
///
/// Returns the status the file holds afterwards.
pub async fn update_total_and_failed(
    pool: &SqlitePool,
    upload_id: i64,
    total: i64,
    failed: i64,
) -> Result<UploadStatus> {
    let status = if total > 0 && failed >= total {
        UploadStatus::Failed
    } else {
        UploadStatus::InProgress
    };
    sqlx::query(
        r#"
        UPDATE uploaded_files
        SET total_records = ?, failed_records = ?, success_records = 0, status = ?
        WHERE upload_id = ?
        "#,
    )
    .bind(total)
    .bind(failed)
    .bind(status.as_str())
    .bind(upload_id)
    .execute(pool)
    .await?;
    Ok(status)
}

/// Add to the success and failed counters
///
/// When the counters cover every record the file is finalized and the new
/// terminal status is returned. Only the update that crosses the threshold
/// sees `Some`.
pub async fn update_counts(
    pool: &SqlitePool,
    upload_id: i64,
    success_delta: i64,
    failed_delta: i64,
) -> Result<Option<UploadStatus>> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE uploaded_files
        SET success_records = success_records + ?, failed_records = failed_records + ?
        WHERE upload_id = ?
        "#,
    )
    .bind(success_delta)
    .bind(failed_delta)
    .bind(upload_id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(Error::NotFound(format!("Upload {}", upload_id)));
    }

    let row = sqlx::query(
        "SELECT status, total_records, success_records, failed_records \
         FROM uploaded_files WHERE upload_id = ?",
    )
    .bind(upload_id)
    .fetch_one(&mut *tx)
    .await?;

    let status: String = row.get("status");
    let total: i64 = row.get("total_records");
    let success: i64 = row.get("success_records");
    let failed: i64 = row.get("failed_records");

    let already_terminal = UploadStatus::parse(&status)
        .map(|s| s.is_terminal())
        .unwrap_or(false);

    let finalized = if !already_terminal && total > 0 && success + failed >= total {
        let next = UploadStatus::from_counts(success, failed);
        sqlx::query("UPDATE uploaded_files SET status = ? WHERE upload_id = ?")
            .bind(next.as_str())
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
        Some(next)
    } else {
        None
    };

    tx.commit().await?;
    Ok(finalized)
}

/// Roll a global file up from its derived files once all of them are terminal
///
/// Returns the global file's new status, or `None` while siblings are still
/// running or when it was already rolled up.
pub async fn rollup_global(pool: &SqlitePool, global_file_id: i64) -> Result<Option<UploadStatus>> {
    let mut tx = pool.begin().await?;

    let statuses: Vec<String> = sqlx::query_scalar(
        "SELECT status FROM uploaded_files WHERE global_file_id = ? AND data_type != 'GLOBALDATA'",
    )
    .bind(global_file_id)
    .fetch_all(&mut *tx)
    .await?;

    let parsed: Vec<UploadStatus> = statuses
        .iter()
        .filter_map(|s| UploadStatus::parse(s))
        .collect();

    if parsed.is_empty() || parsed.iter().any(|s| !s.is_terminal()) {
        tx.rollback().await?;
        return Ok(None);
    }

    let next = if parsed.iter().all(|s| *s == UploadStatus::Success) {
        UploadStatus::Success
    } else if parsed.iter().all(|s| *s == UploadStatus::Failed) {
        UploadStatus::Failed
    } else {
        UploadStatus::Partial
    };

    let updated = sqlx::query(
        "UPDATE uploaded_files SET status = ? \
         WHERE upload_id = ? AND status NOT IN ('SUCCESS', 'FAILED', 'PARTIAL')",
    )
    .bind(next.as_str())
    .bind(global_file_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok((updated.rows_affected() > 0).then_some(next))
}

/// Sort and page parameters for upload listings
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct UploadListQuery {
    pub page_num: i64,
    pub page_size: i64,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

fn sort_clause(query: &UploadListQuery) -> String {
    let column = match query.sort_by.as_deref() {
        Some("upload_id") => "upload_id",
        Some("scope") => "scope",
        Some("file_name") => "file_name",
        Some("status") => "status",
        Some("uploaded_by") => "uploaded_by",
        _ => "uploaded_on",
    };
    let order = match query.sort_order.as_deref() {
        Some(o) if o.eq_ignore_ascii_case("asc") => "ASC",
        _ => "DESC",
    };
    format!("{} {}, upload_id {}", column, order, order)
}

pub async fn list_uploads(
    pool: &SqlitePool,
    scope: &str,
    data_type: DataType,
    query: &UploadListQuery,
) -> Result<Page<UploadRecord>> {
    let (limit, offset) = page_bounds(query.page_num, query.page_size);

    let total_records: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM uploaded_files WHERE scope = ? AND data_type = ?",
    )
    .bind(scope)
    .bind(data_type.as_str())
    .fetch_one(pool)
    .await?;

    let sql = format!(
        "SELECT {} FROM uploaded_files WHERE scope = ? AND data_type = ? \
         ORDER BY {} LIMIT ? OFFSET ?",
        UPLOAD_COLUMNS,
        sort_clause(query)
    );
    let rows = sqlx::query(&sql)
        .bind(scope)
        .bind(data_type.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    let items = rows.iter().map(row_to_upload).collect::<Result<Vec<_>>>()?;
    Ok(Page { total_records, items })
}

/// Global files still waiting for transformed output
pub async fn list_pending_global(pool: &SqlitePool) -> Result<Vec<UploadRecord>> {
    let sql = format!(
        "SELECT {} FROM uploaded_files \
         WHERE data_type = 'GLOBALDATA' AND status IN ('PENDING', 'UPLOADED') \
         ORDER BY upload_id",
        UPLOAD_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(row_to_upload).collect()
}

/// Most recent global file of a scope
pub async fn latest_global_for_scope(
    pool: &SqlitePool,
    scope: &str,
) -> Result<Option<UploadRecord>> {
    let sql = format!(
        "SELECT {} FROM uploaded_files WHERE scope = ? AND data_type = 'GLOBALDATA' \
         ORDER BY upload_id DESC LIMIT 1",
        UPLOAD_COLUMNS
    );
    let row = sqlx::query(&sql).bind(scope).fetch_optional(pool).await?;
    row.as_ref().map(row_to_upload).transpose()
}
