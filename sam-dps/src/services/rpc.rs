//! Downstream service calls
//!
//! Every outbound call is described by an [`RpcMethod`] and executed by an
//! [`RpcTransport`]. API jobs pick their method through [`route`], a match on
//! the envelope's entity tag and action.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::RpcConfig;
use crate::models::{TargetAction, TargetRpc, TargetService};

/// Downstream failure
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("ServiceUnavaliable: {0}")]
    Unavailable(String),

    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// Service answered with a non-success status
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("TargetServiceNotSupported: {0}")]
    NotSupported(String),
}

/// Remote procedure exposed by a downstream service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    UpsertApplication,
    DeleteApplication,
    UpsertInstance,
    DeleteInstance,
    DropApplicationData,
    UpsertMetadata,
    UpsertEquipment,
    DropEquipmentData,
    UpsertProduct,
    DeleteProduct,
    UpsertAcqRights,
    DeleteAcqRights,
    DropProductData,
    CreateDashboardUpdateJob,
}

impl RpcMethod {
    pub fn name(&self) -> &'static str {
        match self {
            RpcMethod::UpsertApplication => "UpsertApplication",
            RpcMethod::DeleteApplication => "DeleteApplication",
            RpcMethod::UpsertInstance => "UpsertInstance",
            RpcMethod::DeleteInstance => "DeleteInstance",
            RpcMethod::DropApplicationData => "DropApplicationData",
            RpcMethod::UpsertMetadata => "UpsertMetadata",
            RpcMethod::UpsertEquipment => "UpsertEquipment",
            RpcMethod::DropEquipmentData => "DropEquipmentData",
            RpcMethod::UpsertProduct => "UpsertProduct",
            RpcMethod::DeleteProduct => "DeleteProduct",
            RpcMethod::UpsertAcqRights => "UpsertAcqRights",
            RpcMethod::DeleteAcqRights => "DeleteAcqRights",
            RpcMethod::DropProductData => "DropProductData",
            RpcMethod::CreateDashboardUpdateJob => "CreateDashboardUpdateJob",
        }
    }

    pub fn service(&self) -> TargetService {
        match self {
            RpcMethod::UpsertApplication
            | RpcMethod::DeleteApplication
            | RpcMethod::UpsertInstance
            | RpcMethod::DeleteInstance
            | RpcMethod::DropApplicationData => TargetService::Application,
            RpcMethod::UpsertMetadata
            | RpcMethod::UpsertEquipment
            | RpcMethod::DropEquipmentData => TargetService::Equipment,
            RpcMethod::UpsertProduct
            | RpcMethod::DeleteProduct
            | RpcMethod::UpsertAcqRights
            | RpcMethod::DeleteAcqRights
            | RpcMethod::DropProductData
            | RpcMethod::CreateDashboardUpdateJob => TargetService::Product,
        }
    }
}

/// Method that handles an envelope, `None` for unsupported pairs
pub fn route(rpc: TargetRpc, action: TargetAction) -> Option<RpcMethod> {
    use TargetAction::*;
    use TargetRpc::*;

    let method = match (rpc, action) {
        (Applications, Upsert) => RpcMethod::UpsertApplication,
        (Applications, Delete) => RpcMethod::DeleteApplication,
        (Applications, Drop) => RpcMethod::DropApplicationData,
        (ApplicationsInstances, Upsert) => RpcMethod::UpsertInstance,
        (ApplicationsInstances, Delete) => RpcMethod::DeleteInstance,
        (InstancesProducts, Upsert) | (InstancesEquipments, Upsert) => RpcMethod::UpsertInstance,
        (Products, Upsert) => RpcMethod::UpsertProduct,
        (Products, Delete) => RpcMethod::DeleteProduct,
        (Products, Drop) => RpcMethod::DropProductData,
        (ApplicationsProducts, Upsert) | (ProductsEquipments, Upsert) => RpcMethod::UpsertProduct,
        (ProductsAcquiredrights, Upsert) => RpcMethod::UpsertAcqRights,
        (ProductsAcquiredrights, Delete) => RpcMethod::DeleteAcqRights,
        (Metadata, Upsert) => RpcMethod::UpsertMetadata,
        (Equipments, Upsert) => RpcMethod::UpsertEquipment,
        (Equipments, Drop) => RpcMethod::DropEquipmentData,
        _ => return None,
    };
    Some(method)
}

/// Executes one downstream call with a deadline
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn invoke(
        &self,
        method: RpcMethod,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, RpcError>;
}

/// JSON over HTTP: `POST <base_url>/api/v1/<method>`
pub struct HttpTransport {
    client: reqwest::Client,
    application_url: String,
    equipment_url: String,
    product_url: String,
}

impl HttpTransport {
    pub fn new(config: &RpcConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            application_url: config.application_url.trim_end_matches('/').to_string(),
            equipment_url: config.equipment_url.trim_end_matches('/').to_string(),
            product_url: config.product_url.trim_end_matches('/').to_string(),
        }
    }

    fn base_url(&self, service: TargetService) -> &str {
        match service {
            TargetService::Application => &self.application_url,
            TargetService::Equipment => &self.equipment_url,
            TargetService::Product => &self.product_url,
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn invoke(
        &self,
        method: RpcMethod,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let url = format!("{}/api/v1/{}", self.base_url(method.service()), method.name());
        tracing::debug!(url = %url, "Calling downstream service");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout(timeout)
                } else {
                    RpcError::Unavailable(format!("{}: {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RpcError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        // Empty bodies are a plain acknowledgement
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RpcError::Unavailable(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| RpcError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_tables_route_to_parent_upsert() {
        assert_eq!(
            route(TargetRpc::InstancesEquipments, TargetAction::Upsert),
            Some(RpcMethod::UpsertInstance)
        );
        assert_eq!(
            route(TargetRpc::ProductsEquipments, TargetAction::Upsert),
            Some(RpcMethod::UpsertProduct)
        );
    }

    #[test]
    fn unsupported_pairs_have_no_route() {
        assert_eq!(route(TargetRpc::Metadata, TargetAction::Delete), None);
        assert_eq!(route(TargetRpc::InstancesProducts, TargetAction::Drop), None);
    }

    #[test]
    fn routed_methods_live_on_the_envelope_service() {
        let pairs = [
            (TargetRpc::Applications, TargetAction::Upsert),
            (TargetRpc::ApplicationsInstances, TargetAction::Delete),
            (TargetRpc::Products, TargetAction::Upsert),
            (TargetRpc::ProductsAcquiredrights, TargetAction::Upsert),
            (TargetRpc::Equipments, TargetAction::Upsert),
            (TargetRpc::Metadata, TargetAction::Upsert),
        ];
        for (rpc, action) in pairs {
            let method = route(rpc, action).unwrap();
            assert_eq!(method.service(), rpc.service(), "{:?}", method);
        }
    }
}
