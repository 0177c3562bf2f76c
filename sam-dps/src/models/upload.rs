//! Uploaded file and inventory deletion records
//!
//! An [`UploadRecord`] is created PENDING by `NotifyUpload`, moves to
//! INPROGRESS when a file worker claims it and ends in SUCCESS, FAILED or
//! PARTIAL once every derived API job resolves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Data,
    Metadata,
    #[serde(rename = "GLOBALDATA")]
    GlobalData,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Data => "DATA",
            DataType::Metadata => "METADATA",
            DataType::GlobalData => "GLOBALDATA",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DATA" => Some(DataType::Data),
            "METADATA" => Some(DataType::Metadata),
            "GLOBALDATA" => Some(DataType::GlobalData),
            _ => None,
        }
    }
}

/// Upload lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadStatus {
    Pending,
    #[serde(rename = "INPROGRESS")]
    InProgress,
    Uploaded,
    Processed,
    Completed,
    Success,
    Failed,
    Partial,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "PENDING",
            UploadStatus::InProgress => "INPROGRESS",
            UploadStatus::Uploaded => "UPLOADED",
            UploadStatus::Processed => "PROCESSED",
            UploadStatus::Completed => "COMPLETED",
            UploadStatus::Success => "SUCCESS",
            UploadStatus::Failed => "FAILED",
            UploadStatus::Partial => "PARTIAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(UploadStatus::Pending),
            "INPROGRESS" => Some(UploadStatus::InProgress),
            "UPLOADED" => Some(UploadStatus::Uploaded),
            "PROCESSED" => Some(UploadStatus::Processed),
            "COMPLETED" => Some(UploadStatus::Completed),
            "SUCCESS" => Some(UploadStatus::Success),
            "FAILED" => Some(UploadStatus::Failed),
            "PARTIAL" => Some(UploadStatus::Partial),
            _ => None,
        }
    }

    /// SUCCESS, FAILED and PARTIAL never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Success | UploadStatus::Failed | UploadStatus::Partial
        )
    }

    /// Aggregate status of a finished file from its record counters
    pub fn from_counts(success: i64, failed: i64) -> Self {
        if failed == 0 {
            UploadStatus::Success
        } else if success == 0 {
            UploadStatus::Failed
        } else {
            UploadStatus::Partial
        }
    }
}

/// Whether the upload applies to a generic or a specific scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScopeType {
    #[default]
    Generic,
    Specific,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Generic => "GENERIC",
            ScopeType::Specific => "SPECIFIC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GENERIC" => Some(ScopeType::Generic),
            "SPECIFIC" => Some(ScopeType::Specific),
            _ => None,
        }
    }
}

/// Persisted uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub upload_id: i64,
    pub scope: String,
    pub data_type: DataType,
    pub file_name: String,
    pub status: UploadStatus,
    pub uploaded_by: String,
    pub uploaded_on: DateTime<Utc>,
    pub total_records: i64,
    pub success_records: i64,
    pub failed_records: i64,
    pub comments: String,
    pub global_file_id: Option<i64>,
    pub scope_type: ScopeType,
    pub analysis_id: Option<String>,
}

/// Values for a new upload row
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub scope: String,
    pub data_type: DataType,
    pub file_name: String,
    pub uploaded_by: String,
    pub global_file_id: Option<i64>,
    pub scope_type: ScopeType,
    pub analysis_id: Option<String>,
}

/// Inventory deletion kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeletionType {
    /// Applications, equipments and products
    Park,
    /// Acquired rights only
    #[serde(rename = "ACQRIGHTS")]
    AcqRights,
    Full,
}

impl DeletionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionType::Park => "PARK",
            DeletionType::AcqRights => "ACQRIGHTS",
            DeletionType::Full => "FULL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PARK" => Some(DeletionType::Park),
            "ACQRIGHTS" => Some(DeletionType::AcqRights),
            "FULL" => Some(DeletionType::Full),
            _ => None,
        }
    }
}

/// Inventory deletion lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeletionStatus {
    #[serde(rename = "INPROGRESS")]
    InProgress,
    Success,
    Failed,
}

impl DeletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionStatus::InProgress => "INPROGRESS",
            DeletionStatus::Success => "SUCCESS",
            DeletionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INPROGRESS" => Some(DeletionStatus::InProgress),
            "SUCCESS" => Some(DeletionStatus::Success),
            "FAILED" => Some(DeletionStatus::Failed),
            _ => None,
        }
    }
}

/// Persisted inventory deletion
#[derive(Debug, Clone, Serialize)]
pub struct DeletionRecord {
    pub id: i64,
    pub scope: String,
    pub deletion_type: DeletionType,
    pub status: DeletionStatus,
    pub reason: String,
    pub created_by: String,
    pub created_on: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_status_from_counts() {
        assert_eq!(UploadStatus::from_counts(3, 0), UploadStatus::Success);
        assert_eq!(UploadStatus::from_counts(0, 3), UploadStatus::Failed);
        assert_eq!(UploadStatus::from_counts(2, 1), UploadStatus::Partial);
    }

    #[test]
    fn data_type_parse_is_case_insensitive() {
        assert_eq!(DataType::parse("globaldata"), Some(DataType::GlobalData));
        assert_eq!(DataType::parse("Data"), Some(DataType::Data));
        assert_eq!(DataType::parse("other"), None);
    }

    #[test]
    fn serde_names_match_storage_names() {
        let json = serde_json::to_string(&UploadStatus::InProgress).unwrap();
        assert_eq!(json, "\"INPROGRESS\"");
        let json = serde_json::to_string(&DeletionType::AcqRights).unwrap();
        assert_eq!(json, "\"ACQRIGHTS\"");
    }
}
