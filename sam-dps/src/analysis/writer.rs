//! Output workbooks

use rust_xlsxwriter::{Color, Format, FormatPattern, Note, Workbook, Worksheet, XlsxError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::schema::{self, FieldType, SheetKind};
use super::validator::SheetHeaders;
use super::workbook::Rows;
use super::{AnalysisError, CommentTarget, ObjectCommentInfo};
use crate::services::core_factor_cache::CoreFactorTrie;

const NOTE_AUTHOR: &str = "OPTISAM";
const CORE_FACTOR_COLUMN: &str = "oracle_core_factor";

/// Rows of one sheet bound for the good or bad workbook
#[derive(Debug)]
pub struct SheetRows {
    pub kind: SheetKind,
    pub rows: Vec<Vec<String>>,
}

/// Annotations collected for one sheet
#[derive(Debug)]
pub struct SheetNotes {
    pub kind: SheetKind,
    pub notes: Vec<ObjectCommentInfo>,
}

fn write_error(path: &Path) -> impl Fn(XlsxError) -> AnalysisError + '_ {
    move |e| AnalysisError::Write {
        file: path.display().to_string(),
        message: e.to_string(),
    }
}

/// Write filtered rows per sheet; returns false (and leaves no file) when
/// every sheet is empty
///
/// With a trie the servers sheet gains an `oracle_core_factor` column.
pub fn write_filtered(
    path: &Path,
    sheets: &[(SheetKind, &SheetHeaders, Vec<Vec<String>>)],
    core_factors: Option<&CoreFactorTrie>,
) -> Result<bool, AnalysisError> {
    if sheets.iter().all(|(_, _, rows)| rows.is_empty()) {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        return Ok(false);
    }

    let mut workbook = Workbook::new();
    for (kind, headers, rows) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(kind.name()).map_err(write_error(path))?;
        for (col, name) in headers.names.iter().enumerate() {
            worksheet
                .write_string(0, col as u16, name)
                .map_err(write_error(path))?;
        }

        let factor_col = headers.width() as u16;
        let factors = core_factors.filter(|_| *kind == SheetKind::Servers);
        if factors.is_some() {
            worksheet
                .write_string(0, factor_col, CORE_FACTOR_COLUMN)
                .map_err(write_error(path))?;
        }

        for (i, row) in rows.iter().enumerate() {
            let row_no = i as u32 + 1;
            for (col, value) in row.iter().enumerate().take(headers.width()) {
                let field_type = schema::field_spec(*kind, &headers.names[col]).field_type;
                write_typed(worksheet, row_no, col as u16, value, field_type, true)
                    .map_err(write_error(path))?;
            }
            if let Some(trie) = factors {
                let factor = trie.lookup(
                    headers.value(row, "cpu_manufacturer"),
                    headers.value(row, "cpu_model"),
                );
                worksheet
                    .write_number(row_no, factor_col, factor)
                    .map_err(write_error(path))?;
            }
        }
    }

    workbook.save(path).map_err(write_error(path))?;
    Ok(true)
}

/// Numbers go out as numbers; with `zero_fill` a non-number becomes 0
fn write_typed(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &str,
    field_type: FieldType,
    zero_fill: bool,
) -> Result<(), XlsxError> {
    let number = match field_type {
        FieldType::Int => value.parse::<i64>().ok().map(|v| v as f64),
        FieldType::Float => value.parse::<f64>().ok(),
        FieldType::String | FieldType::Date => None,
    };
    let numeric = matches!(field_type, FieldType::Int | FieldType::Float);
    match number {
        Some(n) => worksheet.write_number(row, col, n).map(|_| ()),
        None if numeric && zero_fill => worksheet.write_number(row, col, 0.0).map(|_| ()),
        None => worksheet.write_string(row, col, value).map(|_| ()),
    }
}

#[derive(Default)]
struct CellStyle {
    color: Option<&'static str>,
    notes: Vec<String>,
}

fn parse_color(hex: &str) -> Color {
    Color::RGB(u32::from_str_radix(hex.trim_start_matches('#'), 16).unwrap_or(0xFFFFFF))
}

/// Rewrite the upload with colored, noted cells for every annotation
pub fn write_report(
    path: &Path,
    sheets: &[(String, Arc<Rows>)],
    notes: &HashMap<String, Vec<ObjectCommentInfo>>,
) -> Result<(), AnalysisError> {
    let mut workbook = Workbook::new();

    for (name, rows) in sheets {
        let kind = SheetKind::from_name(name);
        let header_row = rows.first().cloned().unwrap_or_default();
        let mut styles: HashMap<(u32, u16), CellStyle> = HashMap::new();

        for note in notes.get(name).map(Vec::as_slice).unwrap_or_default() {
            let color = note.action.color();
            let noted = match &note.target {
                CommentTarget::Cell { row, col } => vec![(*row, *col)],
                CommentTarget::Cells(cells) => cells.clone(),
                CommentTarget::FullRow { row, width } => {
                    let last = width.saturating_sub(1);
                    if note.action.colors_full_row() {
                        for col in 0..last {
                            styles.entry((*row, col)).or_default().color = Some(color);
                        }
                    }
                    vec![(*row, last)]
                }
            };
            for cell in noted {
                let style = styles.entry(cell).or_default();
                style.color = Some(color);
                style.notes.push(note.msg.clone());
            }
        }

        let worksheet = workbook.add_worksheet();
        worksheet.set_name(name).map_err(write_error(path))?;

        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if styles.contains_key(&(r as u32, c as u16)) || value.is_empty() {
                    continue;
                }
                let field_type = match (kind, r) {
                    (Some(kind), r) if r > 0 => header_row
                        .get(c)
                        .map(|h| schema::field_spec(kind, &h.to_lowercase()).field_type)
                        .unwrap_or(FieldType::String),
                    _ => FieldType::String,
                };
                write_typed(worksheet, r as u32, c as u16, value, field_type, false)
                    .map_err(write_error(path))?;
            }
        }

        for ((r, c), style) in &styles {
            let format = Format::new()
                .set_pattern(FormatPattern::Solid)
                .set_background_color(parse_color(style.color.unwrap_or("#FFFFFF")));
            let value = rows
                .get(*r as usize)
                .and_then(|row| row.get(*c as usize))
                .map(String::as_str)
                .unwrap_or("");
            let written = if value.is_empty() {
                worksheet.write_blank(*r, *c, &format)
            } else {
                worksheet.write_string_with_format(*r, *c, value, &format)
            };
            written.map_err(write_error(path))?;

            if !style.notes.is_empty() {
                let note = Note::new(style.notes.join("\n")).set_author(NOTE_AUTHOR);
                worksheet.insert_note(*r, *c, &note).map_err(write_error(path))?;
            }
        }
    }

    workbook.save(path).map_err(write_error(path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::validator::resolve_headers;
    use crate::analysis::workbook::Workbook as Reader;
    use crate::analysis::ActionKind;
    use crate::db::core_factor::CoreFactorReference;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn empty_outputs_are_not_written() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("good_inv.xlsx");
        std::fs::write(&path, "stale").unwrap();
        let headers = resolve_headers(&strings(&["sku"]));

        let written =
            write_filtered(&path, &[(SheetKind::AcquiredRights, &headers, Vec::new())], None).unwrap();

        assert!(!written);
        assert!(!path.exists());
    }

    #[test]
    fn servers_gain_core_factor_column() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("good_inv.xlsx");
        let headers = resolve_headers(&strings(&["server_id", "cpu_manufacturer", "cpu_model", "cores_per_processor"]));
        let trie = CoreFactorTrie::build(&[
            CoreFactorReference {
                manufacturer: "default".into(),
                model: "".into(),
                core_factor: "1".into(),
            },
            CoreFactorReference {
                manufacturer: "Intel".into(),
                model: "Xeon".into(),
                core_factor: "0.5".into(),
            },
        ])
        .unwrap();

        let rows = vec![strings(&["s1", "intel", "xeon", "4"]), strings(&["s2", "ibm", "power", ""])];
        assert!(write_filtered(&path, &[(SheetKind::Servers, &headers, rows)], Some(&trie)).unwrap());

        let mut reader = Reader::open(&path).unwrap();
        let read = reader.read("servers").unwrap();
        assert_eq!(read[0][4], "oracle_core_factor");
        assert_eq!(read[1], strings(&["s1", "intel", "xeon", "4", "0.5"]));
        assert_eq!(read[2], strings(&["s2", "ibm", "power", "0", "1"]));
    }

    #[test]
    fn report_keeps_every_sheet() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("inv.xlsx");
        let sheets = vec![
            ("servers".to_string(), Arc::new(vec![strings(&["server_id"]), strings(&["s1"])])),
            ("notes".to_string(), Arc::new(vec![strings(&["free text"])])),
        ];
        let mut notes = HashMap::new();
        notes.insert(
            "servers".to_string(),
            vec![ObjectCommentInfo::full_row("dup", ActionKind::DuplicateLine, 1, 1)],
        );

        write_report(&path, &sheets, &notes).unwrap();

        let mut reader = Reader::open(&path).unwrap();
        assert_eq!(reader.sheet_names(), vec!["servers", "notes"]);
        assert_eq!(reader.read("servers").unwrap()[1], strings(&["s1"]));
    }
}
