//! Order placement and stock bookkeeping.
//!
//! This crate provides:
//! - [`InventoryLedger`]: atomic stock reservation and release with audit logging
//! - [`RawOrder`] validation into an [`OrderRequest`]
//! - [`OrderCoordinator`]: transactional order placement plus order reads and updates
//! - [`CachePolicy`]: best-effort read-through caching shared by the services

pub mod cache;
pub mod error;
pub mod ledger;
pub mod order;

pub use cache::{CachePolicy, DEFAULT_CACHE_TTL};
pub use error::InventoryError;
pub use ledger::{InventoryLedger, REASON_ADJUSTMENT, REASON_INITIAL, REASON_RESERVATION, REASON_REVERSAL};
pub use order::{
    OrderCoordinator, OrderError, OrderLine, OrderRequest, OrderUpdate, RawOrder, RawOrderError,
};
