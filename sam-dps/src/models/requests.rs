//! Request bodies sent to the downstream application, equipment and product services

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductApplications {
    pub operation: String,
    pub application_id: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquipmentUser {
    pub equipment_id: String,
    pub num_user: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductEquipments {
    pub operation: String,
    pub equipmentusers: Vec<EquipmentUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertProductRequest {
    pub swid_tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub editor: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub option_of: String,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applications: Option<ProductApplications>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipments: Option<ProductEquipments>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertApplicationRequest {
    pub application_id: String,
    pub name: String,
    pub version: String,
    pub owner: String,
    pub domain: String,
    pub scope: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteApplicationRequest {
    pub application_id: String,
    pub scope: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceProducts {
    pub operation: String,
    pub product_id: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceEquipments {
    pub operation: String,
    pub equipment_id: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertInstanceRequest {
    #[serde(default)]
    pub application_id: String,
    pub instance_id: String,
    #[serde(default)]
    pub instance_name: String,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<InstanceProducts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipments: Option<InstanceEquipments>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteInstanceRequest {
    pub application_id: String,
    pub instance_id: String,
    pub scope: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertAcqRightsRequest {
    pub sku: String,
    pub swidtag: String,
    pub product_name: String,
    pub product_editor: String,
    pub version: String,
    pub entity: String,
    pub metric_type: String,
    pub num_licenses_acquired: i32,
    pub num_licences_maintainance: i32,
    pub avg_unit_price: f64,
    pub avg_maintenance_unit_price: f64,
    pub total_purchase_cost: f64,
    pub total_maintenance_cost: f64,
    pub total_cost: f64,
    pub start_of_maintenance: String,
    pub end_of_maintenance: String,
    pub scope: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertMetadataRequest {
    pub metadata_type: String,
    pub metadata_source: String,
    pub metadata_attributes: Vec<String>,
    pub scope: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquipmentRequest {
    pub scope: String,
    pub eq_type: String,
    pub eq_data: serde_json::Map<String, serde_json::Value>,
}

/// Scope-wide drop (DeleteInventory)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropScopeRequest {
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_type: Option<String>,
}

/// Dashboard recalculation trigger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardUpdateRequest {
    pub scope: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteProductRequest {
    pub swid_tag: String,
    pub scope: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteAcqRightsRequest {
    pub sku: String,
    pub scope: String,
}
