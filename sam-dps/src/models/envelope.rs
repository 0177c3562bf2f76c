//! Job payloads
//!
//! [`Envelope`] travels inside an API job and tells the worker which
//! downstream service, entity and action the embedded request targets.
//! [`FileJobPayload`] and [`DeferPayload`] carry file and deferred counter
//! work respectively.

use serde::{Deserialize, Serialize};

use super::upload::DataType;

/// Downstream service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetService {
    Application,
    Equipment,
    Product,
}

impl TargetService {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetService::Application => "application",
            TargetService::Equipment => "equipment",
            TargetService::Product => "product",
        }
    }
}

/// What to do with the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetAction {
    Upsert,
    Delete,
    /// Drops a whole scope; not counted against file records
    Drop,
}

impl TargetAction {
    /// Flag column convention: "1" upserts, "0" deletes
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag.trim() {
            "1" => Some(TargetAction::Upsert),
            "0" => Some(TargetAction::Delete),
            _ => None,
        }
    }

    /// Operation keyword used inside downstream link requests
    pub fn api_operation(&self) -> &'static str {
        match self {
            TargetAction::Upsert => "add",
            TargetAction::Delete => "delete",
            TargetAction::Drop => "drop",
        }
    }
}

/// Entity kind carried by an envelope (one per inventory file type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetRpc {
    Metadata,
    Equipments,
    Applications,
    ApplicationsInstances,
    InstancesProducts,
    InstancesEquipments,
    Products,
    ApplicationsProducts,
    ProductsEquipments,
    ProductsAcquiredrights,
}

impl TargetRpc {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetRpc::Metadata => "METADATA",
            TargetRpc::Equipments => "EQUIPMENTS",
            TargetRpc::Applications => "APPLICATIONS",
            TargetRpc::ApplicationsInstances => "APPLICATIONS_INSTANCES",
            TargetRpc::InstancesProducts => "INSTANCES_PRODUCTS",
            TargetRpc::InstancesEquipments => "INSTANCES_EQUIPMENTS",
            TargetRpc::Products => "PRODUCTS",
            TargetRpc::ApplicationsProducts => "APPLICATIONS_PRODUCTS",
            TargetRpc::ProductsEquipments => "PRODUCTS_EQUIPMENTS",
            TargetRpc::ProductsAcquiredrights => "PRODUCTS_ACQUIREDRIGHTS",
        }
    }

    /// Service that owns this entity
    pub fn service(&self) -> TargetService {
        match self {
            TargetRpc::Metadata | TargetRpc::Equipments => TargetService::Equipment,
            TargetRpc::Applications
            | TargetRpc::ApplicationsInstances
            | TargetRpc::InstancesProducts
            | TargetRpc::InstancesEquipments => TargetService::Application,
            TargetRpc::Products
            | TargetRpc::ApplicationsProducts
            | TargetRpc::ProductsEquipments
            | TargetRpc::ProductsAcquiredrights => TargetService::Product,
        }
    }
}

/// API job payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub data: serde_json::Value,
    pub target_service: TargetService,
    pub target_action: TargetAction,
    pub target_rpc: TargetRpc,
    pub file_name: String,
    #[serde(default)]
    pub transformed_file_name: String,
    pub upload_id: i64,
    #[serde(default)]
    pub global_file_id: Option<i64>,
}

/// File job payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileJobPayload {
    pub upload_id: i64,
    pub scope: String,
    pub file_name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub global_file_id: Option<i64>,
}

/// Counter update the API worker could not persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeferOutcome {
    Success,
    Failed,
}

impl DeferOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeferOutcome::Success => "SUCCESS",
            DeferOutcome::Failed => "FAILED",
        }
    }
}

/// Defer job payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferPayload {
    pub upload_id: i64,
    pub file_name: String,
    pub outcome: DeferOutcome,
    pub count: i64,
    #[serde(default)]
    pub global_file_id: Option<i64>,
}

/// Data of an `InsufficentData` / `DuplicateRecord` audit job
///
/// Shares the `data` / `upload_id` layout of [`Envelope`] so failed API jobs
/// and audit jobs are listed by the same query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub data: serde_json::Value,
    pub upload_id: i64,
    pub file_name: String,
    pub scope: String,
}

impl AuditRecord {
    pub fn invalid_line(upload_id: i64, file_name: &str, scope: &str, line: i64) -> Self {
        Self {
            data: serde_json::json!({ "AtLineNo": line.to_string() }),
            upload_id,
            file_name: file_name.to_string(),
            scope: scope.to_string(),
        }
    }

    pub fn duplicate(upload_id: i64, file_name: &str, scope: &str, record: serde_json::Value) -> Self {
        Self {
            data: record,
            upload_id,
            file_name: file_name.to_string(),
            scope: scope.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_lookup() {
        assert_eq!(TargetAction::from_flag("1"), Some(TargetAction::Upsert));
        assert_eq!(TargetAction::from_flag("0"), Some(TargetAction::Delete));
        assert_eq!(TargetAction::from_flag(" 1 "), Some(TargetAction::Upsert));
        assert_eq!(TargetAction::from_flag("2"), None);
        assert_eq!(TargetAction::from_flag(""), None);
    }

    #[test]
    fn rpc_tags_serialise_as_file_types() {
        let json = serde_json::to_string(&TargetRpc::ProductsAcquiredrights).unwrap();
        assert_eq!(json, "\"PRODUCTS_ACQUIREDRIGHTS\"");
        let back: TargetRpc = serde_json::from_str("\"INSTANCES_EQUIPMENTS\"").unwrap();
        assert_eq!(back, TargetRpc::InstancesEquipments);
    }
}
