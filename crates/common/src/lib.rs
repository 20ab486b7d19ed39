//! Shared identifiers and value types used across the back office crates.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{CustomerId, OrderId, OrderedItemId, ProductId, WarehouseId};
