//! Inventory error types.

use store::{StockKey, StoreError};
use thiserror::Error;

/// Errors that can occur during inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Quantities moved through the ledger must be positive; stock levels non-negative.
    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity { quantity: i64 },

    /// No inventory row exists for the product in the warehouse.
    #[error("Inventory not found for {0}")]
    NotFound(StockKey),

    /// Not enough stock to reserve the requested quantity.
    #[error("Insufficient stock for {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: StockKey,
        requested: i64,
        available: i64,
    },

    /// The inventory row was already registered.
    #[error("Inventory already exists for {0}")]
    AlreadyExists(StockKey),

    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
