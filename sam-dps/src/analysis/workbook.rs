//! Reading the uploaded workbook
//!
//! Cells are rendered to the text a spreadsheet shows: integral numbers
//! without a fraction, dates as `DD-MM-YYYY`. Trailing empty cells are
//! dropped from every row so two rows that only differ by trailing blanks
//! compare equal.

use calamine::{open_workbook, Data, Reader, Xlsx};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Rows of one sheet, header row first
pub type Rows = Vec<Vec<String>>;

/// An opened `.xlsx` workbook
pub struct Workbook {
    inner: Xlsx<BufReader<File>>,
}

impl Workbook {
    pub fn open(path: &Path) -> Result<Self, calamine::XlsxError> {
        let inner: Xlsx<_> = open_workbook(path)?;
        Ok(Self { inner })
    }

    /// Sheet names in workbook order
    pub fn sheet_names(&self) -> Vec<String> {
        self.inner.sheet_names()
    }

    /// Read a sheet as text rows anchored at cell A1
    pub fn read(&mut self, sheet: &str) -> Result<Rows, calamine::XlsxError> {
        let range = self.inner.worksheet_range(sheet)?;
        let Some((start_row, start_col)) = range.start() else {
            return Ok(Vec::new());
        };

        let mut rows: Rows = vec![Vec::new(); start_row as usize];
        for cells in range.rows() {
            let mut row: Vec<String> = vec![String::new(); start_col as usize];
            row.extend(cells.iter().map(cell_text));
            while row.last().is_some_and(|c| c.is_empty()) {
                row.pop();
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => format_number(*f),
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) => value.format("%d-%m-%Y").to_string(),
            None => format_number(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => e.to_string(),
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_render_like_a_spreadsheet() {
        assert_eq!(cell_text(&Data::Float(4.0)), "4");
        assert_eq!(cell_text(&Data::Float(0.25)), "0.25");
        assert_eq!(cell_text(&Data::String(" x ".into())), "x");
        assert_eq!(cell_text(&Data::Empty), "");
    }
}
