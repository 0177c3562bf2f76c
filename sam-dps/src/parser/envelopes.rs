//! Parsed records -> API job envelopes
//!
//! Entity files produce one envelope per record. Link tables are grouped by
//! action and parent so one downstream call carries every child of a parent;
//! such envelopes are always UPSERTs of the parent with an `add`/`delete`
//! operation inside.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{FileData, ParsedRecords};
use crate::models::requests::{
    DeleteAcqRightsRequest, DeleteApplicationRequest, DeleteInstanceRequest, DeleteProductRequest,
    EquipmentRequest, EquipmentUser, InstanceEquipments, InstanceProducts, ProductApplications,
    ProductEquipments, UpsertAcqRightsRequest, UpsertApplicationRequest, UpsertInstanceRequest,
    UpsertMetadataRequest, UpsertProductRequest,
};
use crate::models::{Envelope, TargetAction, TargetRpc};

struct EnvelopeBuilder<'a> {
    data: &'a FileData,
    upload_id: i64,
    global_file_id: Option<i64>,
    out: Vec<Envelope>,
}

impl<'a> EnvelopeBuilder<'a> {
    fn push<T: Serialize>(&mut self, action: TargetAction, body: &T) -> serde_json::Result<()> {
        let rpc = self.data.target_rpc();
        self.out.push(Envelope {
            data: serde_json::to_value(body)?,
            target_service: rpc.service(),
            target_action: action,
            target_rpc: rpc,
            file_name: self.data.file_name.clone(),
            transformed_file_name: if self.global_file_id.is_some() {
                self.data.file_name.clone()
            } else {
                String::new()
            },
            upload_id: self.upload_id,
            global_file_id: self.global_file_id,
        });
        Ok(())
    }
}

/// Build every API envelope for a parsed file
pub fn build_envelopes(
    data: &FileData,
    upload_id: i64,
    global_file_id: Option<i64>,
) -> serde_json::Result<Vec<Envelope>> {
    let mut b = EnvelopeBuilder {
        data,
        upload_id,
        global_file_id,
        out: Vec::with_capacity(data.records.len()),
    };
    let scope = data.scope.clone();

    match &data.records {
        ParsedRecords::Metadata { source, attributes } => {
            b.push(
                TargetAction::Upsert,
                &UpsertMetadataRequest {
                    metadata_type: "equipment".to_string(),
                    metadata_source: source.clone(),
                    metadata_attributes: attributes.clone(),
                    scope,
                },
            )?;
        }
        ParsedRecords::Equipments { eq_type, rows } => {
            for row in rows {
                b.push(
                    TargetAction::Upsert,
                    &EquipmentRequest {
                        scope: scope.clone(),
                        eq_type: eq_type.to_lowercase(),
                        eq_data: row.clone(),
                    },
                )?;
            }
        }
        ParsedRecords::Products(products) => {
            for p in products.values() {
                match p.action {
                    TargetAction::Delete => b.push(
                        TargetAction::Delete,
                        &DeleteProductRequest {
                            swid_tag: p.swid_tag.clone(),
                            scope: scope.clone(),
                        },
                    )?,
                    _ => b.push(
                        TargetAction::Upsert,
                        &UpsertProductRequest {
                            swid_tag: p.swid_tag.clone(),
                            name: p.name.clone(),
                            version: p.version.clone(),
                            editor: p.editor.clone(),
                            category: p.category.clone(),
                            option_of: p.option_of.clone(),
                            scope: scope.clone(),
                            ..Default::default()
                        },
                    )?,
                }
            }
        }
        ParsedRecords::Applications(apps) => {
            for a in apps.values() {
                match a.action {
                    TargetAction::Delete => b.push(
                        TargetAction::Delete,
                        &DeleteApplicationRequest {
                            application_id: a.application_id.clone(),
                            scope: scope.clone(),
                        },
                    )?,
                    _ => b.push(
                        TargetAction::Upsert,
                        &UpsertApplicationRequest {
                            application_id: a.application_id.clone(),
                            name: a.name.clone(),
                            version: a.version.clone(),
                            owner: a.owner.clone(),
                            domain: a.domain.clone(),
                            scope: scope.clone(),
                        },
                    )?,
                }
            }
        }
        ParsedRecords::Instances(instances) => {
            for i in instances.values() {
                match i.action {
                    TargetAction::Delete => b.push(
                        TargetAction::Delete,
                        &DeleteInstanceRequest {
                            application_id: i.application_id.clone(),
                            instance_id: i.instance_id.clone(),
                            scope: scope.clone(),
                        },
                    )?,
                    _ => b.push(
                        TargetAction::Upsert,
                        &UpsertInstanceRequest {
                            application_id: i.application_id.clone(),
                            instance_id: i.instance_id.clone(),
                            instance_name: i.environment.clone(),
                            scope: scope.clone(),
                            ..Default::default()
                        },
                    )?,
                }
            }
        }
        ParsedRecords::AcqRights(rights) => {
            for r in rights.values() {
                match r.action {
                    TargetAction::Delete => b.push(
                        TargetAction::Delete,
                        &DeleteAcqRightsRequest {
                            sku: r.sku.clone(),
                            scope: scope.clone(),
                        },
                    )?,
                    _ => b.push(
                        TargetAction::Upsert,
                        &UpsertAcqRightsRequest {
                            sku: r.sku.clone(),
                            swidtag: r.swidtag.clone(),
                            product_name: r.product_name.clone(),
                            product_editor: r.editor.clone(),
                            version: r.version.clone(),
                            entity: r.entity.clone(),
                            metric_type: r.metric.clone(),
                            num_licenses_acquired: r.acquired_licenses,
                            num_licences_maintainance: r.maintenance_licenses,
                            avg_unit_price: r.unit_price,
                            avg_maintenance_unit_price: r.maintenance_unit_price,
                            total_purchase_cost: r.total_license_cost,
                            total_maintenance_cost: r.total_maintenance_cost,
                            total_cost: r.total_cost,
                            start_of_maintenance: r.maintenance_start.clone(),
                            end_of_maintenance: r.maintenance_end.clone(),
                            scope: scope.clone(),
                        },
                    )?,
                }
            }
        }
        ParsedRecords::Links(links) => {
            // (action, parent) -> rows, in key order
            let mut grouped: BTreeMap<(TargetAction, &str), Vec<&super::LinkRow>> = BTreeMap::new();
            for link in links.values() {
                grouped
                    .entry((link.action, link.parent.as_str()))
                    .or_default()
                    .push(link);
            }

            for ((action, parent), children) in grouped {
                let operation = action.api_operation().to_string();
                let ids = || children.iter().map(|c| c.child.clone()).collect::<Vec<_>>();
                match data.target_rpc() {
                    TargetRpc::ApplicationsProducts => b.push(
                        TargetAction::Upsert,
                        &UpsertProductRequest {
                            swid_tag: parent.to_string(),
                            scope: scope.clone(),
                            applications: Some(ProductApplications {
                                operation,
                                application_id: ids(),
                            }),
                            ..Default::default()
                        },
                    )?,
                    TargetRpc::ProductsEquipments => b.push(
                        TargetAction::Upsert,
                        &UpsertProductRequest {
                            swid_tag: parent.to_string(),
                            scope: scope.clone(),
                            equipments: Some(ProductEquipments {
                                operation,
                                equipmentusers: children
                                    .iter()
                                    .map(|c| EquipmentUser {
                                        equipment_id: c.child.clone(),
                                        num_user: c.num_users.unwrap_or(0),
                                    })
                                    .collect(),
                            }),
                            ..Default::default()
                        },
                    )?,
                    TargetRpc::InstancesProducts => b.push(
                        TargetAction::Upsert,
                        &UpsertInstanceRequest {
                            instance_id: parent.to_string(),
                            scope: scope.clone(),
                            products: Some(InstanceProducts {
                                operation,
                                product_id: ids(),
                            }),
                            ..Default::default()
                        },
                    )?,
                    TargetRpc::InstancesEquipments => b.push(
                        TargetAction::Upsert,
                        &UpsertInstanceRequest {
                            instance_id: parent.to_string(),
                            scope: scope.clone(),
                            equipments: Some(InstanceEquipments {
                                operation,
                                equipment_id: ids(),
                            }),
                            ..Default::default()
                        },
                    )?,
                    other => {
                        tracing::warn!(rpc = other.as_str(), "Link records for a non-link file type");
                    }
                }
            }
        }
    }

    Ok(b.out)
}

/// File records an envelope stands for: link payloads count their list
/// length, everything else counts one
pub fn payload_count(envelope: &Envelope) -> i64 {
    let pointer = match envelope.target_rpc {
        TargetRpc::ApplicationsProducts => "/applications/application_id",
        TargetRpc::ProductsEquipments => "/equipments/equipmentusers",
        TargetRpc::InstancesProducts => "/products/product_id",
        TargetRpc::InstancesEquipments => "/equipments/equipment_id",
        _ => return 1,
    };
    envelope
        .data
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(|list| list.len() as i64)
        .unwrap_or(1)
}
