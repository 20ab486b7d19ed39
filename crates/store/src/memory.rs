use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, OrderedItemId, ProductId, WarehouseId};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::compensation::{
    Compensation, CompensationId, CompensationItem, CompensationState, NewCompensation,
};
use crate::records::{
    Inventory, InventoryLogEntry, NewInventoryLog, NewOrder, NewOrderedItem, Order, OrderStatus,
    OrderedItem, StockDecrement, StockKey,
};
use crate::store::{Database, StoreTransaction};
use crate::{Result, StoreError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    orders: BTreeMap<OrderId, Order>,
    items: BTreeMap<OrderedItemId, OrderedItem>,
    inventory: BTreeMap<StockKey, Inventory>,
    log: Vec<InventoryLogEntry>,
    compensations: BTreeMap<CompensationId, Compensation>,
    next_order_id: i64,
    next_item_id: i64,
    next_log_id: i64,
}

#[derive(Debug, Default)]
struct Faults {
    fail_on_commit: bool,
    fail_on_increment: BTreeSet<ProductId>,
}

/// In-memory store implementation for testing.
///
/// Transactions are serialisable: [`begin`](Database::begin) waits until no
/// other transaction is open, then works on a private copy of the data that
/// replaces the shared state on commit. Pool-level reads also wait for the
/// open transaction, so a task must not read through the store while it
/// holds a transaction.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<RwLock<Faults>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every following commit to fail (and roll back).
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.faults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_commit = fail;
    }

    /// Configures stock increments of `product_id` to fail.
    pub fn set_fail_on_increment(&self, product_id: ProductId, fail: bool) {
        let mut faults = self.faults.write().unwrap_or_else(PoisonError::into_inner);
        if fail {
            faults.fail_on_increment.insert(product_id);
        } else {
            faults.fail_on_increment.remove(&product_id);
        }
    }

    /// Returns the number of order rows, deleted ones included.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Returns the number of order line rows, deleted ones included.
    pub async fn ordered_item_count(&self) -> usize {
        self.state.lock().await.items.len()
    }

    /// Returns the number of audit rows across all inventory.
    pub async fn log_count(&self) -> usize {
        self.state.lock().await.log.len()
    }
}

#[async_trait]
impl Database for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTransaction {
            guard,
            working,
            faults: self.faults.clone(),
        })
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.live_order(id).cloned())
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn get_ordered_items(&self, order_id: OrderId) -> Result<Vec<OrderedItem>> {
        let state = self.state.lock().await;
        Ok(state.live_items(order_id))
    }

    async fn get_inventory(&self, key: StockKey) -> Result<Option<Inventory>> {
        let state = self.state.lock().await;
        Ok(state.inventory.get(&key).cloned())
    }

    async fn list_inventory(&self, warehouse_id: WarehouseId) -> Result<Vec<Inventory>> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .inventory
            .values()
            .filter(|i| i.warehouse_id == warehouse_id)
            .cloned()
            .collect();
        rows.sort_by_key(|i| i.product_id);
        Ok(rows)
    }

    async fn get_inventory_log(&self, key: StockKey) -> Result<Vec<InventoryLogEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .log
            .iter()
            .filter(|e| e.product_id == key.product_id && e.warehouse_id == key.warehouse_id)
            .cloned()
            .collect())
    }

    async fn get_compensation(&self, id: CompensationId) -> Result<Option<Compensation>> {
        let state = self.state.lock().await;
        Ok(state.compensations.get(&id).cloned())
    }

    async fn list_open_compensations(&self) -> Result<Vec<Compensation>> {
        let state = self.state.lock().await;
        let mut open: Vec<_> = state
            .compensations
            .values()
            .filter(|c| c.state.can_resume())
            .cloned()
            .collect();
        open.sort_by_key(|c| c.created_at);
        Ok(open)
    }
}

impl MemoryState {
    fn live_order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id).filter(|o| o.deleted_at.is_none())
    }

    fn live_items(&self, order_id: OrderId) -> Vec<OrderedItem> {
        let mut items: Vec<_> = self
            .items
            .values()
            .filter(|i| i.order_id == order_id && i.deleted_at.is_none())
            .cloned()
            .collect();
        items.sort_by_key(|i| i.product_id);
        items
    }
}

/// Transaction over an [`InMemoryStore`].
///
/// Holds the store lock for its whole lifetime; writes go to a private copy
/// that is discarded unless the transaction commits.
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    faults: Arc<RwLock<Faults>>,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        self.working.next_order_id += 1;
        let now = Utc::now();
        let row = Order {
            id: OrderId::new(self.working.next_order_id),
            customer_id: order.customer_id,
            warehouse_id: order.warehouse_id,
            status: order.status,
            total_cost: order.total_cost,
            total_fees: order.total_fees,
            total_checkout: order.total_checkout,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.working.orders.insert(row.id, row.clone());
        Ok(row)
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.working.live_order(id).cloned())
    }

    async fn update_order(&mut self, order: &Order) -> Result<Option<Order>> {
        let Some(row) = self
            .working
            .orders
            .get_mut(&order.id)
            .filter(|o| o.deleted_at.is_none())
        else {
            return Ok(None);
        };
        row.status = order.status;
        row.total_cost = order.total_cost;
        row.total_fees = order.total_fees;
        row.total_checkout = order.total_checkout;
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn soft_delete_order(&mut self, id: OrderId, status: OrderStatus) -> Result<bool> {
        let Some(row) = self
            .working
            .orders
            .get_mut(&id)
            .filter(|o| o.deleted_at.is_none())
        else {
            return Ok(false);
        };
        let now = Utc::now();
        row.status = status;
        row.updated_at = now;
        row.deleted_at = Some(now);
        Ok(true)
    }

    async fn insert_ordered_item(&mut self, item: NewOrderedItem) -> Result<OrderedItem> {
        let duplicate = self.working.items.values().any(|i| {
            i.order_id == item.order_id && i.product_id == item.product_id && i.deleted_at.is_none()
        });
        if duplicate {
            return Err(StoreError::Simulated(format!(
                "duplicate line for product {} in order {}",
                item.product_id, item.order_id
            )));
        }

        self.working.next_item_id += 1;
        let row = OrderedItem {
            id: OrderedItemId::new(self.working.next_item_id),
            order_id: item.order_id,
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.total_price,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.working.items.insert(row.id, row.clone());
        Ok(row)
    }

    async fn ordered_items(&mut self, order_id: OrderId) -> Result<Vec<OrderedItem>> {
        Ok(self.working.live_items(order_id))
    }

    async fn soft_delete_ordered_items(&mut self, order_id: OrderId) -> Result<u64> {
        let now = Utc::now();
        let mut deleted = 0;
        for item in self
            .working
            .items
            .values_mut()
            .filter(|i| i.order_id == order_id && i.deleted_at.is_none())
        {
            item.deleted_at = Some(now);
            deleted += 1;
        }
        Ok(deleted)
    }

    async fn insert_inventory(&mut self, key: StockKey, stock: i64) -> Result<Option<Inventory>> {
        if self.working.inventory.contains_key(&key) {
            return Ok(None);
        }
        let row = Inventory {
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            stock,
            updated_at: Utc::now(),
        };
        self.working.inventory.insert(key, row.clone());
        Ok(Some(row))
    }

    async fn decrement_stock(&mut self, key: StockKey, quantity: i64) -> Result<StockDecrement> {
        let Some(row) = self.working.inventory.get_mut(&key) else {
            return Ok(StockDecrement::Missing);
        };
        if row.stock < quantity {
            return Ok(StockDecrement::Insufficient {
                available: row.stock,
            });
        }
        row.stock -= quantity;
        row.updated_at = Utc::now();
        Ok(StockDecrement::Applied { stock: row.stock })
    }

    async fn increment_stock(&mut self, key: StockKey, quantity: i64) -> Result<Option<i64>> {
        let injected = self
            .faults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_increment
            .contains(&key.product_id);
        if injected {
            return Err(StoreError::Simulated(format!(
                "stock increment refused for product {}",
                key.product_id
            )));
        }

        let Some(row) = self.working.inventory.get_mut(&key) else {
            return Ok(None);
        };
        row.stock += quantity;
        row.updated_at = Utc::now();
        Ok(Some(row.stock))
    }

    async fn set_stock(&mut self, key: StockKey, stock: i64) -> Result<Option<i64>> {
        let Some(row) = self.working.inventory.get_mut(&key) else {
            return Ok(None);
        };
        let previous = row.stock;
        row.stock = stock;
        row.updated_at = Utc::now();
        Ok(Some(previous))
    }

    async fn append_inventory_log(&mut self, entry: NewInventoryLog) -> Result<()> {
        self.working.next_log_id += 1;
        self.working.log.push(InventoryLogEntry {
            id: self.working.next_log_id,
            product_id: entry.key.product_id,
            warehouse_id: entry.key.warehouse_id,
            stock_change: entry.stock_change,
            reason: entry.reason,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn insert_compensation(
        &mut self,
        compensation: NewCompensation,
    ) -> Result<Compensation> {
        let now = Utc::now();
        let row = Compensation {
            id: CompensationId::new(),
            order_id: compensation.order_id,
            warehouse_id: compensation.warehouse_id,
            state: CompensationState::Pending,
            items: compensation
                .items
                .into_iter()
                .map(|(product_id, quantity)| CompensationItem {
                    product_id,
                    quantity,
                    released: false,
                })
                .collect(),
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.working.compensations.insert(row.id, row.clone());
        Ok(row)
    }

    async fn lock_compensation(&mut self, id: CompensationId) -> Result<Option<Compensation>> {
        Ok(self.working.compensations.get(&id).cloned())
    }

    async fn release_compensation_item(
        &mut self,
        id: CompensationId,
        product_id: ProductId,
    ) -> Result<bool> {
        let item = self
            .working
            .compensations
            .get_mut(&id)
            .and_then(|c| c.items.iter_mut().find(|i| i.product_id == product_id));
        match item {
            Some(item) if !item.released => {
                item.released = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_compensation(
        &mut self,
        id: CompensationId,
        state: CompensationState,
        attempts: i32,
        last_error: Option<String>,
    ) -> Result<()> {
        if let Some(row) = self.working.compensations.get_mut(&id) {
            row.state = state;
            row.attempts = attempts;
            row.last_error = last_error;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let fail = self
            .faults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_commit;
        if fail {
            return Err(StoreError::Simulated("commit refused".to_string()));
        }

        let Self {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
