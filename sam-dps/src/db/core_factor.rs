//! Core factor reference table and upload log

use chrono::{DateTime, Utc};
use sam_common::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use super::{page_bounds, parse_timestamp, Page};

/// One (manufacturer, model) -> factor row; the factor is kept as text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreFactorReference {
    pub manufacturer: String,
    pub model: String,
    pub core_factor: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreFactorLog {
    pub file_name: String,
    pub uploaded_on: DateTime<Utc>,
}

/// Replace the whole reference table and log the source file name
pub async fn replace_references(
    pool: &SqlitePool,
    references: &[CoreFactorReference],
    file_name: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM core_factor_references")
        .execute(&mut *tx)
        .await?;

    for reference in references {
        sqlx::query(
            "INSERT INTO core_factor_references (manufacturer, model, core_factor) VALUES (?, ?, ?)",
        )
        .bind(&reference.manufacturer)
        .bind(&reference.model)
        .bind(&reference.core_factor)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("INSERT INTO core_factor_logs (file_name, uploaded_on) VALUES (?, ?)")
        .bind(file_name)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn all_references(pool: &SqlitePool) -> Result<Vec<CoreFactorReference>> {
    let rows = sqlx::query(
        "SELECT manufacturer, model, core_factor FROM core_factor_references ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| CoreFactorReference {
            manufacturer: row.get("manufacturer"),
            model: row.get("model"),
            core_factor: row.get("core_factor"),
        })
        .collect())
}

pub async fn page_references(
    pool: &SqlitePool,
    page_num: i64,
    page_size: i64,
) -> Result<Page<CoreFactorReference>> {
    let (limit, offset) = page_bounds(page_num, page_size);

    let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM core_factor_references")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        "SELECT manufacturer, model, core_factor FROM core_factor_references \
         ORDER BY manufacturer, model LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let items = rows
        .iter()
        .map(|row| CoreFactorReference {
            manufacturer: row.get("manufacturer"),
            model: row.get("model"),
            core_factor: row.get("core_factor"),
        })
        .collect();

    Ok(Page { total_records, items })
}

/// Upload log, newest first
pub async fn list_logs(pool: &SqlitePool) -> Result<Vec<CoreFactorLog>> {
    let rows = sqlx::query("SELECT file_name, uploaded_on FROM core_factor_logs ORDER BY id DESC")
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            let uploaded_on: String = row.get("uploaded_on");
            Ok(CoreFactorLog {
                file_name: row.get("file_name"),
                uploaded_on: parse_timestamp(&uploaded_on)?,
            })
        })
        .collect()
}
