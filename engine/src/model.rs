//! Point-of-sale entities held by both replicas.

use crate::{
    store::Entity, EntityRef, LocalHandle, Quantity, ServerId, StockDelta, Table, Timestamp,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Anything ordered by a last-writer-wins timestamp.
pub trait Versioned {
    fn updated_at(&self) -> Timestamp;
}

/// Why a record was pulled out of sync batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFlag {
    pub reason: String,
    pub flagged_at: Timestamp,
}

impl ReviewFlag {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            flagged_at: Timestamp::now(),
        }
    }
}

/// A product category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: EntityRef,
    pub title: String,
    pub completed: bool,
    pub updated_at: Timestamp,
}

impl Category {
    /// A category created on this client.
    pub fn new_local(title: impl Into<String>, completed: bool, updated_at: Timestamp) -> Self {
        Self {
            id: EntityRef::new_local(),
            title: title.into(),
            completed,
            updated_at,
        }
    }

    /// A category as the server knows it.
    pub fn remote(
        id: ServerId,
        title: impl Into<String>,
        completed: bool,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id: EntityRef::Remote(id),
            title: title.into(),
            completed,
            updated_at,
        }
    }
}

impl Versioned for Category {
    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
}

impl Entity for Category {
    type Key = EntityRef;
    const TABLE: Table = Table::Categories;

    fn key(&self) -> EntityRef {
        self.id.clone()
    }
}

/// A sellable product. Products are server-owned and always carry a server id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ServerId,
    pub name: String,
    pub price: Decimal,
    pub stock: Quantity,
    #[serde(default)]
    pub category_id: Option<ServerId>,
    pub updated_at: Timestamp,
}

impl Versioned for Product {
    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
}

impl Entity for Product {
    type Key = ServerId;
    const TABLE: Table = Table::Products;

    fn key(&self) -> ServerId {
        self.id
    }
}

/// A signed stock adjustment. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryTransaction {
    pub handle: LocalHandle,
    pub product_id: ServerId,
    pub change: StockDelta,
    pub reason: String,
    pub updated_at: Timestamp,
    pub synced: bool,
    #[serde(default)]
    pub review: Option<ReviewFlag>,
}

impl InventoryTransaction {
    /// Whether this transaction should go out in the next inventory push.
    pub fn is_pushable(&self) -> bool {
        !self.synced && self.review.is_none()
    }
}

impl Entity for InventoryTransaction {
    type Key = LocalHandle;
    const TABLE: Table = Table::Inventory;

    fn key(&self) -> LocalHandle {
        self.handle.clone()
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    #[default]
    Paid,
    Refunded,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "refunded" => Ok(OrderStatus::Refunded),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// A sale.
///
/// `handle` never changes. `id` starts as `Local(handle)` and becomes
/// `Remote` once the server accepts the order, at which point `synced` flips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub handle: LocalHandle,
    pub id: EntityRef,
    pub total: Decimal,
    pub status: OrderStatus,
    pub updated_at: Timestamp,
    pub synced: bool,
    #[serde(default)]
    pub review: Option<ReviewFlag>,
}

impl Order {
    /// Whether this order should go out in the next push batch.
    pub fn is_pushable(&self) -> bool {
        !self.synced && self.review.is_none()
    }
}

impl Versioned for Order {
    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
}

impl Entity for Order {
    type Key = LocalHandle;
    const TABLE: Table = Table::Orders;

    fn key(&self) -> LocalHandle {
        self.handle.clone()
    }
}

/// A line on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub handle: LocalHandle,
    pub order: EntityRef,
    pub product_id: ServerId,
    pub quantity: Quantity,
    pub price: Decimal,
    #[serde(default)]
    pub review: Option<ReviewFlag>,
}

impl Entity for OrderItem {
    type Key = LocalHandle;
    const TABLE: Table = Table::OrderItems;

    fn key(&self) -> LocalHandle {
        self.handle.clone()
    }
}

/// Input for a locally rung-up sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub total: Decimal,
    #[serde(default)]
    pub status: OrderStatus,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderItem {
    pub product_id: ServerId,
    pub quantity: Quantity,
    pub price: Decimal,
}
