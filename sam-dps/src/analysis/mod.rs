//! Pre-ingestion analysis of global workbooks
//!
//! A global workbook carries four sheets (servers, softpartitions, products,
//! acquiredRights). Analysis checks every row against the sheet's declared
//! columns, flags duplicates and inconsistencies, follows references from
//! softpartitions to servers and from products to softpartitions, then
//! writes three workbooks:
//!
//! - `good_<file>`: rows fit for ingestion, servers with their oracle core
//!   factor
//! - `bad_<file>`: every rejected row
//! - `<file>`: the upload itself, annotated with a colored comment per issue
//!
//! Failures prefixed `analysis:` describe a problem with the upload and end
//! the analysis FAILED. Anything else is an internal fault and ends it
//! PARTIAL with `InternalError`.

mod engine;
pub mod schema;
pub mod sheets;
pub mod validator;
pub mod workbook;
mod writer;

pub use engine::AnalysisEngine;
pub use schema::SheetKind;

use serde::Serialize;
use thiserror::Error;

/// Prefix marking a failure caused by the uploaded workbook
pub const USER_FAILURE_PREFIX: &str = "analysis:";

pub const SUCCESSFUL_ANALYSIS: &str = "Analysis has been done, please check the report";
pub const INVALID_FILE_EXTENSION: &str = "Invalid file extension, expecting file.xlsx";
pub const BAD_FILE: &str = "BadOrCorruptFile";
pub const CORE_FACTOR_CACHING_ERROR: &str = "CoreFactorCachingError";

/// Issue category; selects the cell color in the annotated report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActionKind {
    /// Same key with conflicting values, or a field over its length limit
    Inconsistent1,
    /// Cross-field rule broken (maintenance dates)
    Inconsistent2,
    WrongTypeField,
    DuplicateLine,
    MandatoryHeader,
    MissingField,
    DuplicateHeader,
    BadReference,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Inconsistent1 => "inconsistent1",
            ActionKind::Inconsistent2 => "inconsistent2",
            ActionKind::WrongTypeField => "wrongTypeField",
            ActionKind::DuplicateLine => "duplicateLine",
            ActionKind::MandatoryHeader => "mandatoryHeader",
            ActionKind::MissingField => "missingField",
            ActionKind::DuplicateHeader => "duplicateHeader",
            ActionKind::BadReference => "badReference",
        }
    }

    /// Fill color as `#RRGGBB` text
    pub fn color(&self) -> &'static str {
        match self {
            ActionKind::Inconsistent1 => "#FFC0CB",
            ActionKind::Inconsistent2 => "#C0C0C0",
            ActionKind::WrongTypeField => "#FFA500",
            ActionKind::DuplicateLine => "#1986EE",
            ActionKind::MandatoryHeader => "#7FFFD4",
            ActionKind::MissingField => "#008000",
            ActionKind::DuplicateHeader => "#808000",
            ActionKind::BadReference => "#F5CBA7",
        }
    }

    /// Full row annotations color the row from column A to the noted cell
    pub fn colors_full_row(&self) -> bool {
        matches!(
            self,
            ActionKind::DuplicateLine
                | ActionKind::Inconsistent1
                | ActionKind::Inconsistent2
                | ActionKind::BadReference
        )
    }
}

/// Cells an annotation applies to; rows and columns are 0-based
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CommentTarget {
    Cell { row: u32, col: u16 },
    Cells(Vec<(u32, u16)>),
    /// Whole row, noted on its last cell
    FullRow { row: u32, width: u16 },
}

/// One annotation for the report workbook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectCommentInfo {
    pub msg: String,
    pub action: ActionKind,
    pub target: CommentTarget,
}

impl ObjectCommentInfo {
    pub fn cell(msg: impl Into<String>, action: ActionKind, row: u32, col: u16) -> Self {
        Self {
            msg: msg.into(),
            action,
            target: CommentTarget::Cell { row, col },
        }
    }

    pub fn cells(msg: impl Into<String>, action: ActionKind, cells: Vec<(u32, u16)>) -> Self {
        Self {
            msg: msg.into(),
            action,
            target: CommentTarget::Cells(cells),
        }
    }

    pub fn full_row(msg: impl Into<String>, action: ActionKind, row: u32, width: u16) -> Self {
        Self {
            msg: msg.into(),
            action,
            target: CommentTarget::FullRow { row, width },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisStatus {
    Completed,
    Failed,
    Partial,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Failed => "FAILED",
            AnalysisStatus::Partial => "PARTIAL",
        }
    }
}

/// Result of a `DataAnalysis` request; paths are download API URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisResponse {
    pub report: String,
    pub target_file: String,
    pub error_file: String,
    pub status: AnalysisStatus,
    pub description: String,
}

impl AnalysisResponse {
    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            report: String::new(),
            target_file: String::new(),
            error_file: String::new(),
            status: AnalysisStatus::Failed,
            description: description.into(),
        }
    }

    pub fn completed(scope: &str, file: &str) -> Self {
        Self {
            report: format!(
                "api/v1/import/download?fileName={}&downloadType=analysis&scope={}",
                file, scope
            ),
            target_file: format!(
                "api/v1/import/download?fileName=good_{}&downloadType=analysis&scope={}",
                file, scope
            ),
            error_file: format!(
                "api/v1/import/download?fileName=bad_{}&downloadType=error&scope={}",
                file, scope
            ),
            status: AnalysisStatus::Completed,
            description: SUCCESSFUL_ANALYSIS.to_string(),
        }
    }

    /// Map an error to FAILED (user caused) or PARTIAL (internal)
    pub fn from_error(err: &AnalysisError) -> Self {
        let message = err.to_string();
        if message.contains(USER_FAILURE_PREFIX) {
            Self::failed(message)
        } else {
            Self {
                status: AnalysisStatus::Partial,
                description: "InternalError".to_string(),
                ..Self::failed("")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Problem with the uploaded workbook
    #[error("analysis:{0}")]
    Invalid(String),

    #[error("{}", .0.read_failure())]
    SheetRead(SheetKind),

    #[error("failed to write {file}: {message}")]
    Write { file: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
