//! Saga for deleting orders and returning their stock.
//!
//! Deleting an order is a two-phase saga:
//! 1. In one transaction, record a pending compensation and soft-delete the
//!    order with its items.
//! 2. Return each item's quantity to stock in its own transaction, marking
//!    the item released as part of the same commit.
//!
//! If any release fails the compensation stays open and can be replayed
//! (for example by the reconciler) until every item is back in stock.

pub mod coordinator;
pub mod error;
pub mod reversal;

pub use coordinator::{OrderCancellation, ResumeSummary};
pub use error::{CompensationError, Result};
pub use reversal::{OrderReversal, ReversalFailure, ReversalFailureKind, ReversalReport};
