//! Global workbook fixtures

use rust_xlsxwriter::Workbook;
use std::path::Path;

/// Sheet name and rows, header first
pub type Sheet = (&'static str, Vec<Vec<String>>);

fn row(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Write string cells; numeric text is written as numbers
pub fn write_workbook(path: &Path, sheets: &[Sheet]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut workbook = Workbook::new();
    for (name, rows) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(*name).unwrap();
        for (r, cells) in rows.iter().enumerate() {
            for (c, value) in cells.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                match value.parse::<f64>() {
                    Ok(n) if r > 0 => worksheet.write_number(r as u32, c as u16, n).unwrap(),
                    _ => worksheet.write_string(r as u32, c as u16, value).unwrap(),
                };
            }
        }
    }
    workbook.save(path).unwrap();
}

/// A complete global workbook: one server, one softpartition on it, one
/// product on the softpartition and one acquired right
pub fn valid_sheets() -> Vec<Sheet> {
    vec![
        (
            "servers",
            vec![
                row(&[
                    "server_name", "server_id", "cpu_model", "cores_per_processor",
                    "cluster_name", "vcenter_name", "ibm_pvu", "sag_uvu", "cpu_manufacturer",
                    "server_processors_numbers",
                ]),
                row(&["srv1", "S1", "Xeon Gold", "8", "c1", "vc1", "70", "", "Intel", "2"]),
            ],
        ),
        (
            "softpartitions",
            vec![
                row(&["softpartition_name", "softpartition_id", "server_id"]),
                row(&["part1", "P1", "S1"]),
            ],
        ),
        (
            "products",
            vec![
                row(&[
                    "product_name", "product_version", "product_editor", "host_id", "domain",
                    "environment", "application_name", "application_id",
                    "application_instance_name", "number_of_access",
                ]),
                row(&["Oracle DB", "19c", "Oracle", "P1", "Finance", "prod", "Ledger", "A1", "ledger-1", "10"]),
            ],
        ),
        (
            "acquiredRights",
            vec![
                row(&[
                    "maintenance_provider", "last_po", "support_number", "software_provider",
                    "ordering_date", "csc", "sku", "product_name", "product_version",
                    "product_editor", "metric", "acquired_licenses", "unit_price",
                    "maintenance_licences", "maintenance_unit_price", "maintenance_start",
                    "maintenance_end",
                ]),
                row(&[
                    "", "", "", "", "01-01-2020", "", "SKU1", "Oracle DB", "19c", "Oracle",
                    "processor", "4", "100.5", "", "", "", "",
                ]),
            ],
        ),
    ]
}
