//! Inventory file parser
//!
//! Turns one semicolon separated upload into typed, de-duplicated records.
//! The file kind comes from its name:
//!
//! - anything containing `METADATA`: header row only, becomes an equipment
//!   metadata declaration
//! - `<SCOPE>_EQUIPMENT_<TYPE>.csv`: free-form header, one record per row
//! - `<SCOPE>_<TYPE>.csv` for the fixed inventory types
//!
//! Transformed files delivered by the poller carry a `PROCESSING#` marker
//! and a global upload id prefix; both are ignored when classifying.

mod envelopes;
mod records;

pub use envelopes::{build_envelopes, payload_count};
pub use records::{
    AcqRightRow, ApplicationRow, HeaderIndex, InstanceRow, LinkRow, ProductRow,
};

use csv::{ReaderBuilder, StringRecord};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::TargetRpc;
use crate::storage::PROCESSING_MARKER;

/// Field separator of inventory files
pub const DELIMITER: u8 = b';';

/// File-level parse failure; the message is the reason code stored on the upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("MissingFileName")]
    MissingFileName,
    #[error("InvalidFileName")]
    InvalidFileName,
    #[error("InvalidCsvFile")]
    InvalidCsvFile,
    #[error("FileNotSupported")]
    FileNotSupported,
    #[error("HeadersMissing")]
    HeadersMissing,
    #[error("BadFile")]
    BadFile,
    #[error("NoDataInFile")]
    NoDataInFile,
}

impl ParseFailure {
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// What a file contains
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    Metadata,
    /// Dynamic equipment file; carries the upper-case equipment type
    Equipment(String),
    Fixed(TargetRpc),
}

/// Parsed records of one file
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRecords {
    Metadata {
        source: String,
        attributes: Vec<String>,
    },
    Equipments {
        eq_type: String,
        rows: Vec<serde_json::Map<String, Value>>,
    },
    Products(BTreeMap<String, ProductRow>),
    Applications(BTreeMap<String, ApplicationRow>),
    /// Keyed by (application_id, instance_id)
    Instances(BTreeMap<(String, String), InstanceRow>),
    /// Link tables keyed by (parent, child)
    Links(BTreeMap<(String, String), LinkRow>),
    AcqRights(BTreeMap<String, AcqRightRow>),
}

impl ParsedRecords {
    /// Records that will be sent downstream
    pub fn len(&self) -> usize {
        match self {
            ParsedRecords::Metadata { .. } => 1,
            ParsedRecords::Equipments { rows, .. } => rows.len(),
            ParsedRecords::Products(map) => map.len(),
            ParsedRecords::Applications(map) => map.len(),
            ParsedRecords::Instances(map) => map.len(),
            ParsedRecords::Links(map) => map.len(),
            ParsedRecords::AcqRights(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of parsing one file
#[derive(Debug, Clone)]
pub struct FileData {
    pub kind: FileKind,
    pub scope: String,
    pub file_name: String,
    pub records: ParsedRecords,
    /// Data rows read, header excluded
    pub total_count: i64,
    /// 1-based data row numbers of rejected rows
    pub invalid_rows: Vec<i64>,
    /// Values replaced by a later row with the same key
    pub duplicates: Vec<Value>,
}

impl FileData {
    pub fn invalid_count(&self) -> i64 {
        self.invalid_rows.len() as i64
    }

    /// Records that can never succeed: rejected rows and replaced duplicates
    pub fn failed_count(&self) -> i64 {
        self.invalid_count() + self.duplicates.len() as i64
    }

    pub fn target_rpc(&self) -> TargetRpc {
        match &self.kind {
            FileKind::Metadata => TargetRpc::Metadata,
            FileKind::Equipment(_) => TargetRpc::Equipments,
            FileKind::Fixed(rpc) => *rpc,
        }
    }
}

/// Drop the poller's `PROCESSING#` marker and a numeric `<global id>_` prefix
fn strip_transform_prefix(name: &str) -> &str {
    let name = name.strip_prefix(PROCESSING_MARKER).unwrap_or(name);
    match name.split_once('_') {
        Some((prefix, rest))
            if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            rest
        }
        _ => name,
    }
}

/// Global upload id carried by a transformed file name, if any
pub fn global_id_from_name(file_name: &str) -> Option<i64> {
    let name = file_name.strip_prefix(PROCESSING_MARKER).unwrap_or(file_name);
    let (prefix, _) = name.split_once('_')?;
    prefix.parse().ok()
}

/// Determine the file kind from its name
pub fn classify(file_name: &str, scope: &str) -> Result<FileKind, ParseFailure> {
    if file_name.trim().is_empty() {
        return Err(ParseFailure::MissingFileName);
    }

    let upper = file_name.to_ascii_uppercase();
    if upper.contains("METADATA") {
        return Ok(FileKind::Metadata);
    }

    let base = strip_transform_prefix(&upper);
    let separator = format!("{}_", scope.to_ascii_uppercase());
    let Some(pos) = base.find(&separator) else {
        return Err(ParseFailure::InvalidFileName);
    };
    let rest = &base[pos + separator.len()..];
    let Some(file_type) = rest.strip_suffix(".CSV") else {
        return Err(ParseFailure::InvalidCsvFile);
    };

    if let Some(eq_type) = file_type.strip_prefix("EQUIPMENT_") {
        if eq_type.is_empty() {
            return Err(ParseFailure::InvalidFileName);
        }
        return Ok(FileKind::Equipment(eq_type.to_string()));
    }

    let rpc = match file_type {
        "PRODUCTS" => TargetRpc::Products,
        "APPLICATIONS" => TargetRpc::Applications,
        "APPLICATIONS_INSTANCES" => TargetRpc::ApplicationsInstances,
        "APPLICATIONS_PRODUCTS" => TargetRpc::ApplicationsProducts,
        "PRODUCTS_EQUIPMENTS" => TargetRpc::ProductsEquipments,
        "INSTANCES_PRODUCTS" => TargetRpc::InstancesProducts,
        "INSTANCES_EQUIPMENTS" => TargetRpc::InstancesEquipments,
        "PRODUCTS_ACQUIREDRIGHTS" => TargetRpc::ProductsAcquiredrights,
        _ => return Err(ParseFailure::FileNotSupported),
    };
    Ok(FileKind::Fixed(rpc))
}

/// Metadata source: the file name after `<SCOPE>_`, without extension
fn metadata_source(file_name: &str, scope: &str) -> String {
    let upper = file_name.to_ascii_uppercase();
    let separator = format!("{}_", scope.to_ascii_uppercase());
    let rest = match upper.find(&separator) {
        Some(pos) => &file_name[pos + separator.len()..],
        None => file_name,
    };
    match rest.rsplit_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => rest.to_string(),
    }
}

/// Required headers of a fixed file type (lower case, any order)
pub fn expected_headers(rpc: TargetRpc) -> &'static [&'static str] {
    match rpc {
        TargetRpc::Products => &[
            "swidtag", "version", "category", "editor", "isoptionof", "name", "flag",
        ],
        TargetRpc::Applications => &["application_id", "version", "owner", "name", "domain", "flag"],
        TargetRpc::ApplicationsInstances => &["application_id", "instance_id", "environment", "flag"],
        TargetRpc::ApplicationsProducts => &["application_id", "swidtag", "flag"],
        TargetRpc::ProductsEquipments => &["equipment_id", "swidtag", "nbusers", "flag"],
        TargetRpc::InstancesProducts => &["instance_id", "swidtag", "flag"],
        TargetRpc::InstancesEquipments => &["instance_id", "equipment_id", "flag"],
        TargetRpc::ProductsAcquiredrights => &[
            "product_version",
            "entity",
            "sku",
            "swidtag",
            "product_name",
            "editor",
            "metric",
            "acquired_licenses",
            "total_license_cost",
            "total_maintenance_cost",
            "unit_price",
            "maintenance_unit_price",
            "total_cost",
            "flag",
            "maintenance_start",
            "maintenance_end",
            "maintenance_licenses",
        ],
        TargetRpc::Metadata | TargetRpc::Equipments => &[],
    }
}

/// Reads upload files from the incoming directory
#[derive(Debug, Clone)]
pub struct FileParser {
    files_location: PathBuf,
}

impl FileParser {
    pub fn new(files_location: impl Into<PathBuf>) -> Self {
        Self {
            files_location: files_location.into(),
        }
    }

    /// Parse `<files_location>/<file_name>` uploaded for `scope`
    pub fn parse(&self, file_name: &str, scope: &str) -> Result<FileData, ParseFailure> {
        let kind = classify(file_name, scope)?;
        let path = self.files_location.join(file_name);
        let mut rows = open_rows(&path)?;

        let header = match rows.next() {
            Some(Ok(record)) => record,
            _ => return Err(ParseFailure::BadFile),
        };

        let mut data = FileData {
            kind: kind.clone(),
            scope: scope.to_string(),
            file_name: file_name.to_string(),
            records: ParsedRecords::Products(BTreeMap::new()),
            total_count: 0,
            invalid_rows: Vec::new(),
            duplicates: Vec::new(),
        };

        match &kind {
            FileKind::Metadata => {
                let attributes: Vec<String> = header
                    .iter()
                    .map(|h| h.to_string())
                    .filter(|h| !h.is_empty())
                    .collect();
                if attributes.is_empty() {
                    return Err(ParseFailure::NoDataInFile);
                }
                data.total_count = 1;
                data.records = ParsedRecords::Metadata {
                    source: metadata_source(file_name, scope),
                    attributes,
                };
            }
            FileKind::Equipment(eq_type) => {
                records::parse_equipments(eq_type, &header, rows, &mut data)?;
            }
            FileKind::Fixed(rpc) => {
                let index = HeaderIndex::resolve(&header, expected_headers(*rpc))?;
                records::parse_fixed(*rpc, &index, rows, &mut data)?;
            }
        }

        if data.total_count == 0 {
            return Err(ParseFailure::NoDataInFile);
        }

        tracing::info!(
            file_name,
            scope,
            total = data.total_count,
            invalid = data.invalid_count(),
            duplicates = data.duplicates.len(),
            "Parsed file"
        );
        Ok(data)
    }
}

type Rows = csv::StringRecordsIntoIter<File>;

fn open_rows(path: &Path) -> Result<Rows, ParseFailure> {
    let file = File::open(path).map_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Cannot open upload");
        ParseFailure::BadFile
    })?;
    let reader = ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);
    Ok(reader.into_records())
}

/// Next data row, mapping read errors to `BadFile`
pub(crate) fn next_row(rows: &mut Rows) -> Option<Result<StringRecord, ParseFailure>> {
    rows.next()
        .map(|result| result.map_err(|_| ParseFailure::BadFile))
}
