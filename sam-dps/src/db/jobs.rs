//! Persisted job queue table
//!
//! A job is claimed by flipping it to RUNNING inside a transaction; the
//! status guard on the UPDATE makes sure only one worker wins a given row.
//! `not_before` (epoch milliseconds) delays RETRY jobs until their backoff
//! has elapsed.

use chrono::Utc;
use sam_common::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{page_bounds, parse_optional_timestamp, parse_timestamp, Page};
use crate::models::{Job, JobStatus, JobType, NewJob};

const JOB_COLUMNS: &str =
    "job_id, job_type, status, data, comments, retry_count, start_time, end_time, created_on";

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let job_type: String = row.get("job_type");
    let status: String = row.get("status");
    let data: String = row.get("data");
    let created_on: String = row.get("created_on");

    Ok(Job {
        job_id: row.get("job_id"),
        job_type: JobType::parse(&job_type)
            .ok_or_else(|| Error::Internal(format!("Unknown job type '{}'", job_type)))?,
        status: JobStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown job status '{}'", status)))?,
        data: serde_json::from_str(&data)?,
        comments: row.get("comments"),
        retry_count: row.get("retry_count"),
        start_time: parse_optional_timestamp(row.get("start_time"))?,
        end_time: parse_optional_timestamp(row.get("end_time"))?,
        created_on: parse_timestamp(&created_on)?,
    })
}

/// Current time in epoch milliseconds, the unit of `not_before`
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

async fn insert_one<'e, E>(executor: E, job: &NewJob) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let now = Utc::now().to_rfc3339();
    let end_time = (job.status == JobStatus::Failed).then(|| now.clone());
    let result = sqlx::query(
        r#"
        INSERT INTO jobs (job_type, status, data, comments, retry_count, not_before, end_time, created_on)
        VALUES (?, ?, ?, ?, 0, 0, ?, ?)
        "#,
    )
    .bind(job.job_type.as_str())
    .bind(job.status.as_str())
    .bind(serde_json::to_string(&job.data)?)
    .bind(&job.comments)
    .bind(end_time)
    .bind(&now)
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn insert_job(pool: &SqlitePool, job: &NewJob) -> Result<i64> {
    insert_one(pool, job).await
}

/// Insert a batch of jobs atomically
pub async fn insert_jobs(pool: &SqlitePool, jobs: &[NewJob]) -> Result<Vec<i64>> {
    let mut tx = pool.begin().await?;
    let mut ids = Vec::with_capacity(jobs.len());
    for job in jobs {
        ids.push(insert_one(&mut *tx, job).await?);
    }
    tx.commit().await?;
    Ok(ids)
}

pub async fn get_job(pool: &SqlitePool, job_id: i64) -> Result<Option<Job>> {
    let sql = format!("SELECT {} FROM jobs WHERE job_id = ?", JOB_COLUMNS);
    let row = sqlx::query(&sql).bind(job_id).fetch_optional(pool).await?;
    row.as_ref().map(row_to_job).transpose()
}

/// Claim the oldest runnable job of `job_type`
pub async fn claim_next(pool: &SqlitePool, job_type: JobType, now_ms: i64) -> Result<Option<Job>> {
    let mut tx = pool.begin().await?;

    let job_id: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT job_id FROM jobs
        WHERE job_type = ? AND status IN ('PENDING', 'RETRY') AND not_before <= ?
        ORDER BY job_id
        LIMIT 1
        "#,
    )
    .bind(job_type.as_str())
    .bind(now_ms)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(job_id) = job_id else {
        tx.commit().await?;
        return Ok(None);
    };

    let claimed = sqlx::query(
        "UPDATE jobs SET status = 'RUNNING', start_time = ? \
         WHERE job_id = ? AND status IN ('PENDING', 'RETRY')",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(job_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if claimed == 0 {
        // Another worker got there first
        tx.commit().await?;
        return Ok(None);
    }

    let sql = format!("SELECT {} FROM jobs WHERE job_id = ?", JOB_COLUMNS);
    let row = sqlx::query(&sql).bind(job_id).fetch_one(&mut *tx).await?;
    tx.commit().await?;

    row_to_job(&row).map(Some)
}

pub async fn complete_job(pool: &SqlitePool, job_id: i64) -> Result<()> {
    sqlx::query("UPDATE jobs SET status = 'COMPLETED', end_time = ? WHERE job_id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Schedule another attempt no earlier than `not_before_ms`
pub async fn retry_job(
    pool: &SqlitePool,
    job_id: i64,
    not_before_ms: i64,
    comments: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'RETRY', retry_count = retry_count + 1, not_before = ?, \
         comments = ? WHERE job_id = ?",
    )
    .bind(not_before_ms)
    .bind(comments)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fail_job(pool: &SqlitePool, job_id: i64, comments: &str) -> Result<()> {
    sqlx::query("UPDATE jobs SET status = 'FAILED', end_time = ?, comments = ? WHERE job_id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(comments)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Park an exhausted job in `dead_letter_jobs` and mark it FAILED
pub async fn dead_letter(pool: &SqlitePool, job: &Job, reason: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO dead_letter_jobs (job_id, job_type, data, reason, retry_count, created_on)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.job_id)
    .bind(job.job_type.as_str())
    .bind(serde_json::to_string(&job.data)?)
    .bind(reason)
    .bind(job.retry_count)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE jobs SET status = 'FAILED', end_time = ?, comments = ? WHERE job_id = ?")
        .bind(&now)
        .bind(reason)
        .bind(job.job_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn count_dead_letters(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letter_jobs")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Jobs of one type, oldest first
pub async fn list_jobs(pool: &SqlitePool, job_type: JobType) -> Result<Vec<Job>> {
    let sql = format!(
        "SELECT {} FROM jobs WHERE job_type = ? ORDER BY job_id",
        JOB_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(job_type.as_str())
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_job).collect()
}

/// Counts of jobs left unfinished by a previous process
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResumeSummary {
    pub requeued: usize,
    /// Requeued jobs whose retry count was lowered to their limit
    pub clamped: usize,
}

/// Requeue every RUNNING, RETRY and PENDING job
///
/// `limit_for` gives the attempt limit of each job type. A job already past
/// its limit (the limit was lowered between runs) is brought back to the
/// limit, so its next run is its last attempt and the worker accounts for
/// a failure the usual way.
pub async fn resume(
    pool: &SqlitePool,
    limit_for: impl Fn(JobType) -> i64,
) -> Result<ResumeSummary> {
    let sql = format!(
        "SELECT {} FROM jobs WHERE status IN ('RUNNING', 'RETRY', 'PENDING') ORDER BY job_id",
        JOB_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut summary = ResumeSummary::default();
    let mut tx = pool.begin().await?;
    for row in &rows {
        let job = row_to_job(row)?;
        let limit = limit_for(job.job_type).max(0);
        let retry_count = job.retry_count.min(limit);
        sqlx::query(
            "UPDATE jobs SET status = 'PENDING', not_before = 0, retry_count = ? WHERE job_id = ?",
        )
        .bind(retry_count)
        .bind(job.job_id)
        .execute(&mut *tx)
        .await?;
        summary.requeued += 1;
        if retry_count != job.retry_count {
            summary.clamped += 1;
        }
    }
    tx.commit().await?;
    Ok(summary)
}

/// One failed record of an upload
#[derive(Debug, Clone, Serialize)]
pub struct FailedRecord {
    pub data: serde_json::Map<String, Value>,
    pub reason: String,
}

fn stringify_values(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k, Value::String(text))
            })
            .collect(),
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), Value::String(other.to_string()));
            map
        }
    }
}

/// Failed API jobs and audit records of an upload, oldest first
pub async fn list_failed_records(
    pool: &SqlitePool,
    upload_id: i64,
    page_num: i64,
    page_size: i64,
) -> Result<Page<FailedRecord>> {
    let (limit, offset) = page_bounds(page_num, page_size);

    let total_records: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM jobs
        WHERE job_type = 'APITYPE' AND status = 'FAILED'
          AND json_extract(data, '$.upload_id') = ?
        "#,
    )
    .bind(upload_id)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(
        r#"
        SELECT json_extract(data, '$.data') AS record, comments FROM jobs
        WHERE job_type = 'APITYPE' AND status = 'FAILED'
          AND json_extract(data, '$.upload_id') = ?
        ORDER BY job_id
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(upload_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let record: Option<String> = row.get("record");
        let value = match record {
            // json_extract yields bare text for scalar strings
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw.clone())),
            None => Value::Null,
        };
        items.push(FailedRecord {
            data: stringify_values(value),
            reason: row.get("comments"),
        });
    }

    Ok(Page { total_records, items })
}
