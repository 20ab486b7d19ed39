//! Order placement and order maintenance.

mod coordinator;
mod raw;

pub use coordinator::{OrderCoordinator, OrderUpdate};
pub use raw::{OrderLine, OrderRequest, RawOrder, RawOrderError};

use common::{OrderId, ProductId};
use store::StoreError;
use thiserror::Error;

use crate::error::InventoryError;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The raw order failed validation.
    #[error("Invalid order: {0}")]
    InvalidOrder(#[from] RawOrderError),

    /// A referenced product does not resolve in the catalogue.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// A line item could not be reserved.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// The store failed to begin or commit the transaction.
    #[error("Transaction error: {0}")]
    Transaction(StoreError),

    /// A read or write inside the transaction failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The order does not exist or has been deleted.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The requested update is not allowed.
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// A total does not fit in the money type.
    #[error("Order total overflows")]
    Overflow,
}

impl OrderError {
    /// Short label used for the `reason` of failure metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            OrderError::InvalidOrder(_) => "invalid_order",
            OrderError::ProductNotFound(_) => "product_not_found",
            OrderError::Inventory(InventoryError::InsufficientStock { .. }) => {
                "insufficient_stock"
            }
            OrderError::Inventory(InventoryError::NotFound(_)) => "inventory_not_found",
            OrderError::Inventory(_) => "inventory",
            OrderError::Transaction(_) => "transaction",
            OrderError::Store(_) => "store",
            OrderError::NotFound(_) => "not_found",
            OrderError::InvalidUpdate(_) => "invalid_update",
            OrderError::Overflow => "overflow",
        }
    }

    /// Returns the available quantity if this is a stock shortage.
    pub fn available_stock(&self) -> Option<i64> {
        match self {
            OrderError::Inventory(InventoryError::InsufficientStock { available, .. }) => {
                Some(*available)
            }
            _ => None,
        }
    }
}
