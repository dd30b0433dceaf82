//! Request and response bodies of the sync RPC operations.
//!
//! Shared by the client transport and the server handlers. Everything is
//! camelCase on the wire. Fields added on top of the original bodies
//! (`localId`, `rejected`, `nodeId`) default when absent so older peers can
//! still talk to us.

use crate::{
    Category, EntityRef, IdentifierMapping, LocalHandle, OrderStatus, Product, Quantity,
    ServerId, StockDelta, StockLevel, Timestamp,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Category as sent by a client: either a server id or a local handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCategory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ServerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalHandle>,
    pub title: String,
    pub completed: bool,
    pub updated_at: Timestamp,
}

impl From<&Category> for SyncCategory {
    fn from(category: &Category) -> Self {
        let (id, local_id) = match &category.id {
            EntityRef::Remote(id) => (Some(*id), None),
            EntityRef::Local(handle) => (None, Some(handle.clone())),
        };
        Self {
            id,
            local_id,
            title: category.title.clone(),
            completed: category.completed,
            updated_at: category.updated_at,
        }
    }
}

impl SyncCategory {
    /// Rebuild the two-namespace form. A category with neither an id nor a
    /// handle gets a fresh handle, so it is still created exactly once per
    /// request.
    pub fn into_category(self) -> Category {
        let id = match (self.id, self.local_id) {
            (Some(id), _) => EntityRef::Remote(id),
            (None, Some(handle)) => EntityRef::Local(handle),
            (None, None) => EntityRef::new_local(),
        };
        Category {
            id,
            title: self.title,
            completed: self.completed,
            updated_at: self.updated_at,
        }
    }
}

/// Category as stored on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCategory {
    pub id: ServerId,
    pub title: String,
    pub completed: bool,
    pub updated_at: Timestamp,
}

impl From<ServerCategory> for Category {
    fn from(category: ServerCategory) -> Self {
        Category::remote(
            category.id,
            category.title,
            category.completed,
            category.updated_at,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCategoriesRequest {
    pub categories: Vec<SyncCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCategoriesResponse {
    /// Full authoritative list
    pub server_categories: Vec<ServerCategory>,
    /// Categories created by this request
    #[serde(default)]
    pub id_map: Vec<IdentifierMapping>,
}

/// Inventory transaction on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryTransactionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalHandle>,
    pub product_id: ServerId,
    pub change: StockDelta,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncInventoryRequest {
    pub transactions: Vec<InventoryTransactionPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncInventoryResponse {
    /// True when every transaction was recorded
    pub success: bool,
    #[serde(default)]
    pub accepted: Vec<LocalHandle>,
    #[serde(default)]
    pub rejected: Vec<RejectedRecord>,
    #[serde(default)]
    pub server_stock: Vec<StockLevel>,
}

/// Why the server turned a record down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectionKind {
    /// Failed validation; the client keeps it pending and retries
    Invalid,
    /// Would break an invariant such as non-negative stock; flagged for review
    Invariant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRecord {
    pub local_id: LocalHandle,
    pub reason: String,
    pub kind: RejectionKind,
}

/// Order header for the flat remap flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOrder {
    /// Server id the client holds, absent for new orders. The server keys
    /// orders by `local_id` and does not trust this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ServerId>,
    pub local_id: LocalHandle,
    pub total: Decimal,
    pub status: OrderStatus,
    pub updated_at: Timestamp,
}

/// Order line for the flat remap flow. Exactly one of `order_id` and
/// `local_order_id` is expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOrderItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<ServerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_order_id: Option<LocalHandle>,
    pub product_id: ServerId,
    pub quantity: Quantity,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOrdersRequest {
    #[serde(default)]
    pub node_id: String,
    pub orders: Vec<SyncOrder>,
    pub order_items: Vec<SyncOrderItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOrdersResponse {
    pub success: bool,
    pub id_map: Vec<IdentifierMapping>,
    #[serde(default)]
    pub rejected: Vec<RejectedRecord>,
    #[serde(default)]
    pub server_stock: Vec<StockLevel>,
}

/// Order line nested in an authoritative push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushItem {
    pub product_id: ServerId,
    pub quantity: Quantity,
    pub price: Decimal,
}

/// Order with its lines, keyed by the client's local handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOrder {
    pub id: LocalHandle,
    pub total: Decimal,
    pub status: OrderStatus,
    pub items: Vec<PushItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    #[serde(default)]
    pub node_id: String,
    pub orders: Vec<PushOrder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub id_map: Vec<IdentifierMapping>,
    pub server_stock: Vec<StockLevel>,
    #[serde(default)]
    pub rejected: Vec<RejectedRecord>,
}

/// Catalog and stock snapshot used by start of day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
    pub products: Vec<Product>,
    #[serde(default)]
    pub categories: Vec<ServerCategory>,
}
