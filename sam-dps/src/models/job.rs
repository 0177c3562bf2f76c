//! Persisted queue job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker kind a job is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "FILETYPE")]
    File,
    #[serde(rename = "APITYPE")]
    Api,
    #[serde(rename = "DEFERTYPE")]
    Defer,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::File, JobType::Api, JobType::Defer];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::File => "FILETYPE",
            JobType::Api => "APITYPE",
            JobType::Defer => "DEFERTYPE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FILETYPE" => Some(JobType::File),
            "APITYPE" => Some(JobType::Api),
            "DEFERTYPE" => Some(JobType::Defer),
            _ => None,
        }
    }
}

/// Job lifecycle: PENDING -> RUNNING -> COMPLETED | FAILED | RETRY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retry,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Retry => "RETRY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "RUNNING" => Some(JobStatus::Running),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            "RETRY" => Some(JobStatus::Retry),
            _ => None,
        }
    }
}

/// Job as stored in the `jobs` table
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: i64,
    pub job_type: JobType,
    pub status: JobStatus,
    pub data: serde_json::Value,
    pub comments: String,
    pub retry_count: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
}

/// Job to be pushed
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub status: JobStatus,
    pub data: serde_json::Value,
    pub comments: String,
}

impl NewJob {
    pub fn pending(job_type: JobType, data: serde_json::Value) -> Self {
        Self {
            job_type,
            status: JobStatus::Pending,
            data,
            comments: String::new(),
        }
    }

    /// Audit record: stored FAILED and never executed
    pub fn audit(job_type: JobType, data: serde_json::Value, reason: &str) -> Self {
        Self {
            job_type,
            status: JobStatus::Failed,
            data,
            comments: reason.to_string(),
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = comments.into();
        self
    }
}
