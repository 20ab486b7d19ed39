//! Persistence layer for the commerce back office.
//!
//! Everything the order core writes goes through a [`StoreTransaction`]
//! obtained from a [`Database`]; pool-level reads are available directly on
//! the database. Two backends are provided: [`PostgresStore`] and the
//! serialising [`InMemoryStore`] used by tests.

pub mod cache;
pub mod catalog;
pub mod compensation;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

#[cfg(feature = "redis")]
pub mod redis_cache;

pub use cache::{Cache, CacheExt, InMemoryCache};
pub use catalog::{InMemoryProductCatalog, PostgresProductCatalog, Product, ProductCatalog};
pub use common::{CustomerId, Money, OrderId, OrderedItemId, ProductId, WarehouseId};
pub use compensation::{
    Compensation, CompensationId, CompensationItem, CompensationState, NewCompensation,
};
pub use error::{CacheError, Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use records::{
    Inventory, InventoryLogEntry, NewInventoryLog, NewOrder, NewOrderedItem, Order, OrderStatus,
    OrderedItem, StockDecrement, StockKey,
};
pub use store::{Database, StoreTransaction};

#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;
