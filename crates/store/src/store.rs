use async_trait::async_trait;
use common::{OrderId, ProductId, WarehouseId};

use crate::compensation::{Compensation, CompensationId, CompensationState, NewCompensation};
use crate::records::{
    Inventory, InventoryLogEntry, NewInventoryLog, NewOrder, NewOrderedItem, Order, OrderStatus,
    OrderedItem, StockDecrement, StockKey,
};
use crate::Result;

/// Core trait for store implementations.
///
/// Writes happen only inside a [`StoreTransaction`] obtained from
/// [`Database::begin`]. The read methods here see committed data only.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Database: Send + Sync {
    /// Transaction handle produced by this database.
    type Tx: StoreTransaction;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Retrieves a live (not deleted) order.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Retrieves all live orders, ascending by id.
    async fn list_orders(&self) -> Result<Vec<Order>>;

    /// Retrieves the live lines of an order, ascending by product id.
    async fn get_ordered_items(&self, order_id: OrderId) -> Result<Vec<OrderedItem>>;

    /// Retrieves one inventory row.
    async fn get_inventory(&self, key: StockKey) -> Result<Option<Inventory>>;

    /// Retrieves every inventory row of a warehouse, ascending by product id.
    async fn list_inventory(&self, warehouse_id: WarehouseId) -> Result<Vec<Inventory>>;

    /// Retrieves the audit log of one inventory row, oldest first.
    async fn get_inventory_log(&self, key: StockKey) -> Result<Vec<InventoryLogEntry>>;

    /// Retrieves a compensation with its items.
    async fn get_compensation(&self, id: CompensationId) -> Result<Option<Compensation>>;

    /// Retrieves every compensation that is not completed, oldest first.
    async fn list_open_compensations(&self) -> Result<Vec<Compensation>>;
}

/// A unit of work against the store.
///
/// Dropping a transaction without calling [`commit`](StoreTransaction::commit)
/// rolls it back, including when the owning task panics.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Inserts an order row and returns it with its generated id.
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order>;

    /// Reads a live order and locks it until the transaction ends.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Writes status and money columns of a live order.
    ///
    /// Returns `None` if the order does not exist or is deleted.
    async fn update_order(&mut self, order: &Order) -> Result<Option<Order>>;

    /// Soft-deletes a live order, setting its status. Returns false if there was none.
    async fn soft_delete_order(&mut self, id: OrderId, status: OrderStatus) -> Result<bool>;

    /// Inserts an order line and returns it with its generated id.
    async fn insert_ordered_item(&mut self, item: NewOrderedItem) -> Result<OrderedItem>;

    /// Reads the live lines of an order, ascending by product id.
    async fn ordered_items(&mut self, order_id: OrderId) -> Result<Vec<OrderedItem>>;

    /// Soft-deletes every live line of an order, returning how many were deleted.
    async fn soft_delete_ordered_items(&mut self, order_id: OrderId) -> Result<u64>;

    /// Creates an inventory row. Returns `None` if the row already exists.
    async fn insert_inventory(&mut self, key: StockKey, stock: i64) -> Result<Option<Inventory>>;

    /// Subtracts `quantity` from stock only if at least `quantity` is available.
    ///
    /// The check and the write are a single atomic step with respect to
    /// concurrent transactions touching the same row.
    async fn decrement_stock(&mut self, key: StockKey, quantity: i64) -> Result<StockDecrement>;

    /// Adds `quantity` to stock. Returns the new stock, or `None` if the row is missing.
    async fn increment_stock(&mut self, key: StockKey, quantity: i64) -> Result<Option<i64>>;

    /// Overwrites stock, returning the previous value, or `None` if the row is missing.
    async fn set_stock(&mut self, key: StockKey, stock: i64) -> Result<Option<i64>>;

    /// Appends an audit row.
    async fn append_inventory_log(&mut self, entry: NewInventoryLog) -> Result<()>;

    /// Records a pending compensation with one unreleased item per pair.
    async fn insert_compensation(&mut self, compensation: NewCompensation)
    -> Result<Compensation>;

    /// Reads a compensation and locks it until the transaction ends.
    async fn lock_compensation(&mut self, id: CompensationId) -> Result<Option<Compensation>>;

    /// Marks one item released if it was not already.
    ///
    /// Returns false when the item is unknown or was released before, which
    /// makes replays idempotent.
    async fn release_compensation_item(
        &mut self,
        id: CompensationId,
        product_id: ProductId,
    ) -> Result<bool>;

    /// Records the outcome of a release pass.
    async fn update_compensation(
        &mut self,
        id: CompensationId,
        state: CompensationState,
        attempts: i32,
        last_error: Option<String>,
    ) -> Result<()>;

    /// Makes every write of this transaction visible.
    async fn commit(self) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self) -> Result<()>;
}
