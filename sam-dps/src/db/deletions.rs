//! Inventory deletion audit
//!
//! Admission is one conditional insert: the row is written only when no
//! injection is active for the scope, and the partial unique index on
//! active rows rejects a second concurrent deletion.

use chrono::Utc;
use sam_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use super::parse_timestamp;
use super::uploads::ACTIVE_INJECTION_STATUSES;
use crate::models::{DeletionRecord, DeletionStatus, DeletionType};

/// Outcome of a deletion admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(i64),
    InjectionActive,
    DeletionActive,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

/// Record an INPROGRESS deletion if the scope is idle
pub async fn insert_deletion_if_idle(
    pool: &SqlitePool,
    scope: &str,
    deletion_type: DeletionType,
    created_by: &str,
) -> Result<Admission> {
    let now = Utc::now().to_rfc3339();
    let sql = format!(
        r#"
        INSERT INTO deletion_audit
            (scope, deletion_type, status, reason, created_by, created_on, updated_on)
        SELECT ?, ?, 'INPROGRESS', '', ?, ?, ?
        WHERE NOT EXISTS (
            SELECT 1 FROM uploaded_files WHERE scope = ? AND status IN {}
        )
        "#,
        ACTIVE_INJECTION_STATUSES
    );

    let result = sqlx::query(&sql)
        .bind(scope)
        .bind(deletion_type.as_str())
        .bind(created_by)
        .bind(&now)
        .bind(&now)
        .bind(scope)
        .execute(pool)
        .await;

    match result {
        Ok(done) if done.rows_affected() == 0 => Ok(Admission::InjectionActive),
        Ok(done) => Ok(Admission::Admitted(done.last_insert_rowid())),
        Err(e) if is_unique_violation(&e) => Ok(Admission::DeletionActive),
        Err(e) => Err(Error::Database(e)),
    }
}

pub async fn set_deletion_status(
    pool: &SqlitePool,
    id: i64,
    status: DeletionStatus,
    reason: &str,
) -> Result<()> {
    sqlx::query("UPDATE deletion_audit SET status = ?, reason = ?, updated_on = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_deletion(pool: &SqlitePool, id: i64) -> Result<Option<DeletionRecord>> {
    let row = sqlx::query(
        "SELECT id, scope, deletion_type, status, reason, created_by, created_on \
         FROM deletion_audit WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let deletion_type: String = row.get("deletion_type");
    let status: String = row.get("status");
    let created_on: String = row.get("created_on");

    Ok(Some(DeletionRecord {
        id: row.get("id"),
        scope: row.get("scope"),
        deletion_type: DeletionType::parse(&deletion_type).ok_or_else(|| {
            Error::Internal(format!("Unknown deletion type '{}'", deletion_type))
        })?,
        status: DeletionStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown deletion status '{}'", status)))?,
        reason: row.get("reason"),
        created_by: row.get("created_by"),
        created_on: parse_timestamp(&created_on)?,
    }))
}
