//! Compensation error types.

use common::OrderId;
use store::{CompensationId, StoreError};
use thiserror::Error;

use crate::reversal::ReversalFailure;

/// Errors that can occur while cancelling an order or replaying its compensation.
#[derive(Debug, Error)]
pub enum CompensationError {
    /// The order does not exist or was already deleted.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// No compensation record with this id.
    #[error("Compensation not found: {0}")]
    CompensationNotFound(CompensationId),

    /// Every item of the compensation was already returned to stock.
    #[error("Compensation {0} is already completed")]
    AlreadyCompleted(CompensationId),

    /// The store failed to begin or commit a transaction.
    #[error("Transaction error: {0}")]
    Transaction(StoreError),

    /// A read or write failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Some items could not be returned to stock; the compensation stays replayable.
    #[error(
        "{} item(s) of order {order_id} were not returned to stock (compensation {compensation_id})",
        .failures.len()
    )]
    PartialReversal {
        order_id: OrderId,
        compensation_id: CompensationId,
        failures: Vec<ReversalFailure>,
    },
}

/// Convenience type alias for compensation results.
pub type Result<T> = std::result::Result<T, CompensationError>;
