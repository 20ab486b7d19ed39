//! Row types for orders, order lines and inventory.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, OrderedItemId, ProductId, WarehouseId};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order has been placed and stock reserved.
    #[default]
    Pending,
    /// Order has been accepted for fulfilment.
    Confirmed,
    /// Order has left the warehouse.
    Shipped,
    /// Order has reached the customer.
    Delivered,
    /// Order was deleted and its stock handed to compensation.
    Cancelled,
}

impl OrderStatus {
    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(StoreError::Corrupt(format!("unknown order status '{other}'"))),
        }
    }
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub warehouse_id: WarehouseId,
    pub status: OrderStatus,
    pub total_cost: Money,
    pub total_fees: Money,
    /// Always `total_cost + total_fees`.
    pub total_checkout: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Values for inserting an order row; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub customer_id: CustomerId,
    pub warehouse_id: WarehouseId,
    pub status: OrderStatus,
    pub total_cost: Money,
    pub total_fees: Money,
    pub total_checkout: Money,
}

/// A persisted order line, pinned to the unit price at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedItem {
    pub id: OrderedItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
    /// Always `unit_price * quantity`.
    pub total_price: Money,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Values for inserting an order line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderedItem {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
    pub total_price: Money,
}

/// Address of one inventory row: a product held in a warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "product {} in warehouse {}",
            self.product_id, self.warehouse_id
        )
    }
}

/// Stock held for one product in one warehouse. `stock` never drops below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub stock: i64,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row for every stock mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLogEntry {
    pub id: i64,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub stock_change: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Values for appending an audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInventoryLog {
    pub key: StockKey,
    pub stock_change: i64,
    pub reason: String,
}

impl NewInventoryLog {
    pub fn new(key: StockKey, stock_change: i64, reason: impl Into<String>) -> Self {
        Self {
            key,
            stock_change,
            reason: reason.into(),
        }
    }
}

/// Outcome of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    /// The decrement was applied; `stock` is the remaining quantity.
    Applied { stock: i64 },
    /// Not enough stock; nothing was changed.
    Insufficient { available: i64 },
    /// No inventory row exists for the key.
    Missing,
}
