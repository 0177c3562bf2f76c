//! Header and field rules shared by every sheet

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;

use super::schema::{self, FieldType, SheetKind, Tier};
use super::workbook::Rows;
use super::{ActionKind, ObjectCommentInfo};

/// Resolved header row of one sheet
#[derive(Debug, Clone, Default)]
pub struct SheetHeaders {
    /// Lower-cased header text per column, in sheet order
    pub names: Vec<String>,
    /// First column of each header
    pub index: HashMap<String, u16>,
    /// Annotations for repeated headers
    pub duplicates: Vec<ObjectCommentInfo>,
}

impl SheetHeaders {
    pub fn column(&self, header: &str) -> Option<u16> {
        self.index.get(header).copied()
    }

    /// Cell text for `header`, empty when the column or cell is absent
    pub fn value<'a>(&self, row: &'a [String], header: &str) -> &'a str {
        self.column(header)
            .and_then(|col| row.get(col as usize))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn width(&self) -> usize {
        self.names.len()
    }
}

/// Index the header row; repeated headers keep their first column
pub fn resolve_headers(header_row: &[String]) -> SheetHeaders {
    let mut headers = SheetHeaders::default();
    for (col, raw) in header_row.iter().enumerate() {
        let name = raw.trim().to_lowercase();
        let col = col as u16;
        if headers.index.contains_key(&name) {
            headers.duplicates.push(ObjectCommentInfo::cell(
                format!("This header {} is repeated", name),
                ActionKind::DuplicateHeader,
                0,
                col,
            ));
        } else {
            headers.index.insert(name.clone(), col);
        }
        headers.names.push(name);
    }
    headers
}

/// Required headers absent from `headers`
pub fn missing_mandatory_headers(kind: SheetKind, headers: &SheetHeaders) -> Vec<&'static str> {
    schema::columns(kind)
        .iter()
        .filter(|(name, spec)| spec.tier.requires_header() && !headers.index.contains_key(*name))
        .map(|(name, _)| *name)
        .collect()
}

/// `DD-MM-YYYY` or `DD/MM/YYYY`
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&value.replace('/', "-"), "%d-%m-%Y").ok()
}

/// Empty values match every type
pub fn is_type_matched(value: &str, field_type: FieldType) -> bool {
    if value.is_empty() {
        return true;
    }
    match field_type {
        FieldType::String => true,
        FieldType::Int => value.parse::<i64>().is_ok(),
        FieldType::Float => value.parse::<f64>().is_ok(),
        FieldType::Date => parse_date(value).is_some(),
    }
}

/// Mandatory value and type checks for one data row
///
/// `row_no` is the 0-based sheet row. An empty result means the row passed.
pub fn validate_row(
    kind: SheetKind,
    headers: &SheetHeaders,
    row: &[String],
    row_no: u32,
) -> Vec<ObjectCommentInfo> {
    let mut comments = Vec::new();
    for (name, &col) in &headers.index {
        let spec = schema::field_spec(kind, name);
        let value = row.get(col as usize).map(String::as_str).unwrap_or("");

        if spec.tier == Tier::Mandatory && value.is_empty() {
            comments.push(ObjectCommentInfo::cell(
                "This mandatory value is missing.",
                ActionKind::MissingField,
                row_no,
                col,
            ));
        } else if !is_type_matched(value, spec.field_type) {
            comments.push(ObjectCommentInfo::cell(
                format!(
                    "This value is wrongType, expected :{}.",
                    spec.field_type.describe()
                ),
                ActionKind::WrongTypeField,
                row_no,
                col,
            ));
        }
    }
    comments.sort_by_key(|c| match c.target {
        super::CommentTarget::Cell { col, .. } => col,
        _ => 0,
    });
    comments
}

/// Outcome of the checks every sheet applies before its own rules
#[derive(Debug)]
pub enum Screened {
    /// Exact copy of an earlier row
    Duplicate(ObjectCommentInfo),
    Invalid(Vec<ObjectCommentInfo>),
    Valid,
}

/// Exact duplicate detection plus [`validate_row`]
pub struct RowScreen<'a> {
    kind: SheetKind,
    headers: &'a SheetHeaders,
    seen: HashMap<String, u32>,
}

impl<'a> RowScreen<'a> {
    pub fn new(kind: SheetKind, headers: &'a SheetHeaders) -> Self {
        Self {
            kind,
            headers,
            seen: HashMap::new(),
        }
    }

    pub fn screen(&mut self, row: &[String], row_no: u32) -> Screened {
        let key = row.join("|");
        if let Some(first) = self.seen.get(&key) {
            return Screened::Duplicate(ObjectCommentInfo::full_row(
                format!("This row is duplicate with row no {}", first + 1),
                ActionKind::DuplicateLine,
                row_no,
                row.len().max(1) as u16,
            ));
        }
        self.seen.insert(key, row_no);

        let comments = validate_row(self.kind, self.headers, row, row_no);
        if comments.is_empty() {
            Screened::Valid
        } else {
            Screened::Invalid(comments)
        }
    }
}

/// Data rows with their 0-based sheet row numbers
pub fn data_rows(rows: &Rows) -> impl Iterator<Item = (u32, &Vec<String>)> {
    rows.iter()
        .enumerate()
        .skip(1)
        .map(|(i, row)| (i as u32, row))
}

const ACQUIRED_RIGHTS_TEXT_LIMIT: usize = 16;

/// Columns limited to [`ACQUIRED_RIGHTS_TEXT_LIMIT`] characters
const LIMITED_COLUMNS: &[(&str, &str)] = &[
    ("maintenance_provider", "maintenance_provider"),
    ("support_number", "support_number"),
    ("software_provider", "software_provider"),
    ("csc", "csc"),
    ("last_po", "last_purchase_order"),
];

/// Sheet specific rules for one acquired rights row
pub fn acquired_right_inconsistencies(
    headers: &SheetHeaders,
    row: &[String],
    row_no: u32,
) -> Vec<ObjectCommentInfo> {
    let col = |name: &str| headers.column(name).unwrap_or(0);
    let mut comments = Vec::new();

    for (column, label) in LIMITED_COLUMNS {
        if headers.value(row, column).chars().count() > ACQUIRED_RIGHTS_TEXT_LIMIT {
            comments.push(ObjectCommentInfo::cell(
                format!("{} characters max limit is {}", label, ACQUIRED_RIGHTS_TEXT_LIMIT),
                ActionKind::Inconsistent1,
                row_no,
                col(column),
            ));
        }
    }
    if headers.value(row, "sku").contains('+') {
        comments.push(ObjectCommentInfo::cell(
            "Inconsistency,+  is not allowed in sku",
            ActionKind::Inconsistent1,
            row_no,
            col("sku"),
        ));
    }

    let start = headers.value(row, "maintenance_start");
    let end = headers.value(row, "maintenance_end");
    let start_cell = (row_no, col("maintenance_start"));
    let end_cell = (row_no, col("maintenance_end"));
    let licences = maintenance_licences(headers.value(row, "maintenance_licences"));

    let rule = if licences > 0 {
        match (start.is_empty(), end.is_empty()) {
            (false, false) if !is_maintenance_period_ok(start, end) => Some(ObjectCommentInfo::cell(
                "end of maintenance date must be greater than start date",
                ActionKind::Inconsistent2,
                end_cell.0,
                end_cell.1,
            )),
            (false, false) => None,
            (false, true) => Some(ObjectCommentInfo::cell(
                "End of maintenance date is mandatory with maintenance licenses",
                ActionKind::Inconsistent2,
                end_cell.0,
                end_cell.1,
            )),
            (true, false) => Some(ObjectCommentInfo::cell(
                "Start of maintenance date is mandatory with maintenance licenses",
                ActionKind::Inconsistent2,
                start_cell.0,
                start_cell.1,
            )),
            (true, true) => Some(ObjectCommentInfo::cells(
                "start and end of maintenance date is mandatory with maintenance licenses",
                ActionKind::Inconsistent2,
                vec![start_cell, end_cell],
            )),
        }
    } else {
        match (start.is_empty(), end.is_empty()) {
            (false, false) => Some(ObjectCommentInfo::cells(
                "start and end of maintenance date is not considered as maintenance licences no is zero",
                ActionKind::Inconsistent2,
                vec![start_cell, end_cell],
            )),
            (false, true) => Some(ObjectCommentInfo::cell(
                "Start of maintenance date is not considered as maintenance licences no is zero",
                ActionKind::Inconsistent2,
                start_cell.0,
                start_cell.1,
            )),
            (true, false) => Some(ObjectCommentInfo::cell(
                "End of maintenance date is not considered as maintenance licences no is zero",
                ActionKind::Inconsistent2,
                end_cell.0,
                end_cell.1,
            )),
            (true, true) => None,
        }
    };
    comments.extend(rule);
    comments
}

/// Blank counts as zero, garbage as negative
fn maintenance_licences(value: &str) -> i64 {
    if value.is_empty() {
        0
    } else {
        value.parse().unwrap_or(-1)
    }
}

/// End after start and still running today
pub fn is_maintenance_period_ok(start: &str, end: &str) -> bool {
    match (parse_date(start), parse_date(end)) {
        (Some(start), Some(end)) => end > start && end > Utc::now().date_naive(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CommentTarget;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn acquired_headers() -> SheetHeaders {
        resolve_headers(&row(&[
            "sku",
            "product_name",
            "product_version",
            "product_editor",
            "metric",
            "acquired_licenses",
            "unit_price",
            "maintenance_licences",
            "maintenance_start",
            "maintenance_end",
            "maintenance_provider",
            "last_po",
            "support_number",
            "software_provider",
            "csc",
            "ordering_date",
            "maintenance_unit_price",
        ]))
    }

    #[test]
    fn header_resolution_ignores_case_and_order() {
        let a = resolve_headers(&row(&["SoftPartition_ID", "server_id", "softpartition_name"]));
        let b = resolve_headers(&row(&["softpartition_name", "extra", "SERVER_ID", "softpartition_id"]));

        assert!(missing_mandatory_headers(SheetKind::Softpartitions, &a).is_empty());
        assert!(missing_mandatory_headers(SheetKind::Softpartitions, &b).is_empty());
        assert_eq!(b.column("server_id"), Some(2));
    }

    #[test]
    fn missing_and_repeated_headers() {
        let headers = resolve_headers(&row(&["server_id", "server_id", "softpartition_name"]));

        assert_eq!(
            missing_mandatory_headers(SheetKind::Softpartitions, &headers),
            vec!["softpartition_id"]
        );
        assert_eq!(headers.duplicates.len(), 1);
        assert_eq!(headers.duplicates[0].action, ActionKind::DuplicateHeader);
        assert_eq!(headers.duplicates[0].target, CommentTarget::Cell { row: 0, col: 1 });
        assert_eq!(headers.column("server_id"), Some(0));
    }

    #[test]
    fn type_rules() {
        assert!(is_type_matched("", FieldType::Int));
        assert!(is_type_matched("12", FieldType::Int));
        assert!(!is_type_matched("1.5", FieldType::Int));
        assert!(is_type_matched("1.5", FieldType::Float));
        assert!(is_type_matched("31-12-2030", FieldType::Date));
        assert!(is_type_matched("31/12/2030", FieldType::Date));
        assert!(!is_type_matched("2030-12-31", FieldType::Date));
        assert!(!is_type_matched("x", FieldType::Float));
    }

    #[test]
    fn row_validation_reports_each_bad_cell() {
        let headers = resolve_headers(&row(&["softpartition_id", "server_id", "softpartition_name"]));
        let comments = validate_row(SheetKind::Softpartitions, &headers, &row(&["", "srv1"]), 3);

        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].action, ActionKind::MissingField);
        assert_eq!(comments[0].target, CommentTarget::Cell { row: 3, col: 0 });

        let headers = resolve_headers(&row(&["server_id", "cores_per_processor"]));
        let comments = validate_row(SheetKind::Servers, &headers, &row(&["s1", "four"]), 1);
        assert_eq!(comments[0].action, ActionKind::WrongTypeField);
        assert_eq!(comments[0].msg, "This value is wrongType, expected :integer.");
    }

    #[test]
    fn duplicate_rows_reference_first_occurrence() {
        let headers = resolve_headers(&row(&["softpartition_id", "server_id"]));
        let mut screen = RowScreen::new(SheetKind::Softpartitions, &headers);

        assert!(matches!(screen.screen(&row(&["p1", "s1"]), 1), Screened::Valid));
        assert!(matches!(screen.screen(&row(&["p2", "s1"]), 2), Screened::Valid));
        match screen.screen(&row(&["p1", "s1"]), 3) {
            Screened::Duplicate(comment) => {
                assert_eq!(comment.msg, "This row is duplicate with row no 2");
                assert_eq!(comment.target, CommentTarget::FullRow { row: 3, width: 2 });
            }
            other => panic!("expected duplicate, got {:?}", other),
        }
    }

    #[test]
    fn acquired_right_text_limits_and_sku() {
        let headers = acquired_headers();
        let mut values = vec![""; headers.width()];
        values[0] = "SKU+1";
        values[10] = "a provider name longer than sixteen";
        let comments = acquired_right_inconsistencies(&headers, &row(&values), 1);

        let messages: Vec<&str> = comments.iter().map(|c| c.msg.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "maintenance_provider characters max limit is 16",
                "Inconsistency,+  is not allowed in sku"
            ]
        );
        assert!(comments.iter().all(|c| c.action == ActionKind::Inconsistent1));
    }

    #[test]
    fn maintenance_rules() {
        let headers = acquired_headers();
        let mut values = vec![""; headers.width()];

        values[7] = "5";
        let comments = acquired_right_inconsistencies(&headers, &row(&values), 1);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].target, CommentTarget::Cells(vec![(1, 8), (1, 9)]));

        values[8] = "01-01-2020";
        values[9] = "01-01-2019";
        let comments = acquired_right_inconsistencies(&headers, &row(&values), 1);
        assert_eq!(comments[0].msg, "end of maintenance date must be greater than start date");
        assert_eq!(comments[0].action, ActionKind::Inconsistent2);

        values[9] = "01/01/2999";
        assert!(acquired_right_inconsistencies(&headers, &row(&values), 1).is_empty());

        values[7] = "0";
        let comments = acquired_right_inconsistencies(&headers, &row(&values), 1);
        assert_eq!(comments.len(), 1);
        assert!(comments[0].msg.contains("not considered"));
    }
}
