//! Row decoding for each inventory file type

use csv::StringRecord;
use serde::Serialize;
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{next_row, FileData, ParseFailure, ParsedRecords, Rows};
use crate::models::{TargetAction, TargetRpc};

/// Column positions of the required headers
#[derive(Debug, Clone)]
pub struct HeaderIndex {
    positions: HashMap<&'static str, usize>,
    max_index: usize,
}

impl HeaderIndex {
    /// Match the header row against the required names, ignoring case and order
    pub fn resolve(header: &StringRecord, expected: &[&'static str]) -> Result<Self, ParseFailure> {
        if expected.len() > header.len() {
            return Err(ParseFailure::HeadersMissing);
        }

        let actual: HashMap<String, usize> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_lowercase(), i))
            .collect();

        let mut positions = HashMap::with_capacity(expected.len());
        let mut max_index = 0;
        for name in expected {
            let Some(&pos) = actual.get(*name) else {
                tracing::warn!(header = name, "Mandatory header is missing");
                return Err(ParseFailure::HeadersMissing);
            };
            max_index = max_index.max(pos);
            positions.insert(*name, pos);
        }

        Ok(Self {
            positions,
            max_index,
        })
    }

    /// Row carries every required column
    pub fn fits(&self, row: &StringRecord) -> bool {
        row.len() > self.max_index
    }

    /// Field of a resolved header; empty for unknown names or short rows
    pub fn get<'r>(&self, row: &'r StringRecord, name: &str) -> &'r str {
        self.positions
            .get(name)
            .and_then(|&pos| row.get(pos))
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRow {
    pub swid_tag: String,
    pub name: String,
    pub version: String,
    pub editor: String,
    pub category: String,
    pub option_of: String,
    pub action: TargetAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationRow {
    pub application_id: String,
    pub name: String,
    pub version: String,
    pub owner: String,
    pub domain: String,
    pub action: TargetAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceRow {
    pub application_id: String,
    pub instance_id: String,
    pub environment: String,
    pub action: TargetAction,
}

/// Row of a link table: parent entity, linked child and direction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkRow {
    pub parent: String,
    pub child: String,
    pub action: TargetAction,
    /// Only set for product/equipment links
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_users: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcqRightRow {
    pub sku: String,
    pub swidtag: String,
    pub product_name: String,
    pub editor: String,
    pub version: String,
    pub entity: String,
    pub metric: String,
    pub acquired_licenses: i32,
    pub maintenance_licenses: i32,
    pub unit_price: f64,
    pub maintenance_unit_price: f64,
    pub total_license_cost: f64,
    pub total_maintenance_cost: f64,
    pub total_cost: f64,
    pub maintenance_start: String,
    pub maintenance_end: String,
    pub action: TargetAction,
}

/// Insert by natural key; the replaced value goes to the duplicate list
fn insert_keyed<K: Ord, V: Serialize>(
    map: &mut BTreeMap<K, V>,
    key: K,
    value: V,
    duplicates: &mut Vec<Value>,
) {
    if let Some(old) = map.insert(key, value) {
        duplicates.push(serde_json::to_value(&old).unwrap_or(Value::Null));
    }
}

fn lenient_int(s: &str) -> i32 {
    s.trim().parse().unwrap_or(0)
}

fn lenient_float(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}

/// Read every data row of a fixed-type file into `data.records`
pub(crate) fn parse_fixed(
    rpc: TargetRpc,
    index: &HeaderIndex,
    mut rows: Rows,
    data: &mut FileData,
) -> Result<(), ParseFailure> {
    let mut products = BTreeMap::new();
    let mut applications = BTreeMap::new();
    let mut instances = BTreeMap::new();
    let mut links = BTreeMap::new();
    let mut acq_rights = BTreeMap::new();

    while let Some(row) = next_row(&mut rows) {
        let row = row?;
        data.total_count += 1;
        let line = data.total_count;

        let action = TargetAction::from_flag(index.get(&row, "flag"));
        let (true, Some(action)) = (index.fits(&row), action) else {
            data.invalid_rows.push(line);
            continue;
        };
        let field = |name: &str| index.get(&row, name).to_string();

        let accepted = match rpc {
            TargetRpc::Products => {
                let record = ProductRow {
                    swid_tag: field("swidtag"),
                    name: field("name"),
                    version: field("version"),
                    editor: field("editor"),
                    category: field("category"),
                    option_of: field("isoptionof"),
                    action,
                };
                let ok = !record.swid_tag.is_empty();
                if ok {
                    insert_keyed(&mut products, record.swid_tag.clone(), record, &mut data.duplicates);
                }
                ok
            }
            TargetRpc::Applications => {
                let record = ApplicationRow {
                    application_id: field("application_id"),
                    name: field("name"),
                    version: field("version"),
                    owner: field("owner"),
                    domain: field("domain"),
                    action,
                };
                let ok = !record.application_id.is_empty();
                if ok {
                    insert_keyed(
                        &mut applications,
                        record.application_id.clone(),
                        record,
                        &mut data.duplicates,
                    );
                }
                ok
            }
            TargetRpc::ApplicationsInstances => {
                let record = InstanceRow {
                    application_id: field("application_id"),
                    instance_id: field("instance_id"),
                    environment: field("environment"),
                    action,
                };
                let ok = !record.application_id.is_empty() && !record.instance_id.is_empty();
                if ok {
                    let key = (record.application_id.clone(), record.instance_id.clone());
                    insert_keyed(&mut instances, key, record, &mut data.duplicates);
                }
                ok
            }
            TargetRpc::ApplicationsProducts
            | TargetRpc::ProductsEquipments
            | TargetRpc::InstancesProducts
            | TargetRpc::InstancesEquipments => {
                let (parent, child, num_users) = match rpc {
                    TargetRpc::ApplicationsProducts => {
                        (field("swidtag"), field("application_id"), None)
                    }
                    TargetRpc::ProductsEquipments => (
                        field("swidtag"),
                        field("equipment_id"),
                        Some(lenient_int(index.get(&row, "nbusers"))),
                    ),
                    TargetRpc::InstancesProducts => (field("instance_id"), field("swidtag"), None),
                    _ => (field("instance_id"), field("equipment_id"), None),
                };
                let ok = !parent.is_empty() && !child.is_empty();
                if ok {
                    let key = (parent.clone(), child.clone());
                    let record = LinkRow {
                        parent,
                        child,
                        action,
                        num_users,
                    };
                    insert_keyed(&mut links, key, record, &mut data.duplicates);
                }
                ok
            }
            TargetRpc::ProductsAcquiredrights => {
                let record = AcqRightRow {
                    sku: field("sku"),
                    swidtag: field("swidtag"),
                    product_name: field("product_name"),
                    editor: field("editor"),
                    version: field("product_version"),
                    entity: field("entity"),
                    metric: field("metric"),
                    acquired_licenses: lenient_int(index.get(&row, "acquired_licenses")),
                    maintenance_licenses: lenient_int(index.get(&row, "maintenance_licenses")),
                    unit_price: lenient_float(index.get(&row, "unit_price")),
                    maintenance_unit_price: lenient_float(index.get(&row, "maintenance_unit_price")),
                    total_license_cost: lenient_float(index.get(&row, "total_license_cost")),
                    total_maintenance_cost: lenient_float(index.get(&row, "total_maintenance_cost")),
                    total_cost: lenient_float(index.get(&row, "total_cost")),
                    maintenance_start: field("maintenance_start"),
                    maintenance_end: field("maintenance_end"),
                    action,
                };
                let ok = !record.sku.is_empty();
                if ok {
                    insert_keyed(&mut acq_rights, record.sku.clone(), record, &mut data.duplicates);
                }
                ok
            }
            TargetRpc::Metadata | TargetRpc::Equipments => false,
        };

        if !accepted {
            data.invalid_rows.push(line);
        }
    }

    data.records = match rpc {
        TargetRpc::Products => ParsedRecords::Products(products),
        TargetRpc::Applications => ParsedRecords::Applications(applications),
        TargetRpc::ApplicationsInstances => ParsedRecords::Instances(instances),
        TargetRpc::ProductsAcquiredrights => ParsedRecords::AcqRights(acq_rights),
        TargetRpc::Metadata | TargetRpc::Equipments => return Err(ParseFailure::FileNotSupported),
        _ => ParsedRecords::Links(links),
    };
    Ok(())
}

/// Typed value of a dynamic equipment cell: integer, float, bool, else text
pub(crate) fn typed_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" | "t" => Value::Bool(true),
        "false" | "f" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Free-form equipment rows; identical rows are kept once
pub(crate) fn parse_equipments(
    eq_type: &str,
    header: &StringRecord,
    mut rows: Rows,
    data: &mut FileData,
) -> Result<(), ParseFailure> {
    let columns: Vec<String> = header.iter().map(|h| h.to_string()).collect();
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    while let Some(row) = next_row(&mut rows) {
        let row = row?;
        data.total_count += 1;

        if row.len() < columns.len() {
            data.invalid_rows.push(data.total_count);
            continue;
        }

        let mut record = serde_json::Map::with_capacity(columns.len());
        for (name, raw) in columns.iter().zip(row.iter()) {
            record.insert(name.clone(), typed_value(raw));
        }

        let text = row.iter().collect::<Vec<_>>().join(";");
        if seen.insert(text) {
            records.push(record);
        } else {
            data.duplicates.push(Value::Object(record));
        }
    }

    data.records = ParsedRecords::Equipments {
        eq_type: eq_type.to_string(),
        rows: records,
    };
    Ok(())
}
