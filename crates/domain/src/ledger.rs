//! Stock bookkeeping per product and warehouse.

use common::WarehouseId;
use store::{
    Database, Inventory, InventoryLogEntry, NewInventoryLog, StockDecrement, StockKey,
    StoreTransaction,
};

use crate::cache::CachePolicy;
use crate::error::InventoryError;

/// Audit reason of a stock reservation made by order placement.
pub const REASON_RESERVATION: &str = "order reservation";
/// Audit reason of stock returned by an order reversal.
pub const REASON_REVERSAL: &str = "order reversal";
/// Audit reason of a newly registered inventory row.
pub const REASON_INITIAL: &str = "initial stock";
/// Audit reason of a manual stock overwrite.
pub const REASON_ADJUSTMENT: &str = "manual adjustment";

type Result<T> = std::result::Result<T, InventoryError>;

/// Owns every stock mutation and its audit trail.
///
/// The `*_in` methods run inside a caller-supplied transaction so they can
/// share its commit or rollback; the other mutators open and commit their
/// own. Each mutation appends exactly one [`InventoryLogEntry`].
#[derive(Clone)]
pub struct InventoryLedger<D> {
    db: D,
    cache: CachePolicy,
}

impl<D: Database> InventoryLedger<D> {
    /// Creates a ledger without caching.
    pub fn new(db: D) -> Self {
        Self::with_cache(db, CachePolicy::disabled())
    }

    pub fn with_cache(db: D, cache: CachePolicy) -> Self {
        Self { db, cache }
    }

    /// Reserves `quantity` units inside `tx`, returning the remaining stock.
    ///
    /// Fails with [`InventoryError::InsufficientStock`] without touching the
    /// row when less than `quantity` is available.
    #[tracing::instrument(skip(self, tx))]
    pub async fn reduce_in(&self, tx: &mut D::Tx, key: StockKey, quantity: i64) -> Result<i64> {
        ensure_positive(quantity)?;

        match tx.decrement_stock(key, quantity).await? {
            StockDecrement::Applied { stock } => {
                tx.append_inventory_log(NewInventoryLog::new(key, -quantity, REASON_RESERVATION))
                    .await?;
                metrics::counter!("stock_reservations_total").increment(1);
                tracing::debug!(remaining = stock, "stock reserved");
                Ok(stock)
            }
            StockDecrement::Insufficient { available } => {
                metrics::counter!("stock_reservation_rejections_total").increment(1);
                tracing::debug!(available, "stock reservation rejected");
                Err(InventoryError::InsufficientStock {
                    key,
                    requested: quantity,
                    available,
                })
            }
            StockDecrement::Missing => Err(InventoryError::NotFound(key)),
        }
    }

    /// Reserves stock in a transaction of its own.
    pub async fn reduce(&self, key: StockKey, quantity: i64) -> Result<i64> {
        let mut tx = self.db.begin().await?;
        let stock = self.reduce_in(&mut tx, key, quantity).await?;
        tx.commit().await?;
        self.evict(key).await;
        Ok(stock)
    }

    /// Returns `quantity` units to stock inside `tx`, returning the new stock.
    ///
    /// There is no upper bound; the row must exist.
    #[tracing::instrument(skip(self, tx))]
    pub async fn increase_in(&self, tx: &mut D::Tx, key: StockKey, quantity: i64) -> Result<i64> {
        ensure_positive(quantity)?;

        let stock = tx
            .increment_stock(key, quantity)
            .await?
            .ok_or(InventoryError::NotFound(key))?;
        tx.append_inventory_log(NewInventoryLog::new(key, quantity, REASON_REVERSAL))
            .await?;

        metrics::counter!("stock_releases_total").increment(1);
        tracing::debug!(stock, "stock released");
        Ok(stock)
    }

    /// Returns stock in a transaction of its own.
    pub async fn increase(&self, key: StockKey, quantity: i64) -> Result<i64> {
        let mut tx = self.db.begin().await?;
        let stock = self.increase_in(&mut tx, key, quantity).await?;
        tx.commit().await?;
        self.evict(key).await;
        Ok(stock)
    }

    /// Creates the inventory row for a product in a warehouse.
    #[tracing::instrument(skip(self))]
    pub async fn register(&self, key: StockKey, initial_stock: i64) -> Result<Inventory> {
        if initial_stock < 0 {
            return Err(InventoryError::InvalidQuantity {
                quantity: initial_stock,
            });
        }

        let mut tx = self.db.begin().await?;
        let row = tx
            .insert_inventory(key, initial_stock)
            .await?
            .ok_or(InventoryError::AlreadyExists(key))?;
        tx.append_inventory_log(NewInventoryLog::new(key, initial_stock, REASON_INITIAL))
            .await?;
        tx.commit().await?;

        self.evict(key).await;
        tracing::info!(%key, initial_stock, "inventory registered");
        Ok(row)
    }

    /// Overwrites the stock level, logging the difference.
    #[tracing::instrument(skip(self))]
    pub async fn adjust(&self, key: StockKey, new_stock: i64) -> Result<Inventory> {
        if new_stock < 0 {
            return Err(InventoryError::InvalidQuantity {
                quantity: new_stock,
            });
        }

        let mut tx = self.db.begin().await?;
        let previous = tx
            .set_stock(key, new_stock)
            .await?
            .ok_or(InventoryError::NotFound(key))?;
        let change = new_stock - previous;
        if change != 0 {
            tx.append_inventory_log(NewInventoryLog::new(key, change, REASON_ADJUSTMENT))
                .await?;
        }
        tx.commit().await?;

        self.evict(key).await;
        tracing::info!(%key, previous, new_stock, "inventory adjusted");
        self.db
            .get_inventory(key)
            .await?
            .ok_or(InventoryError::NotFound(key))
    }

    /// Reads one inventory row, through the cache.
    pub async fn get_inventory(&self, key: StockKey) -> Result<Inventory> {
        let cache_key = CachePolicy::inventory_key(key);
        if let Some(row) = self.cache.load::<Inventory>(&cache_key).await {
            return Ok(row);
        }

        let row = self
            .db
            .get_inventory(key)
            .await?
            .ok_or(InventoryError::NotFound(key))?;
        self.cache.store(&cache_key, &row).await;
        Ok(row)
    }

    /// Lists the inventory of a warehouse, ascending by product.
    pub async fn list_in_warehouse(&self, warehouse_id: WarehouseId) -> Result<Vec<Inventory>> {
        Ok(self.db.list_inventory(warehouse_id).await?)
    }

    /// Audit trail of one inventory row, oldest first.
    pub async fn history(&self, key: StockKey) -> Result<Vec<InventoryLogEntry>> {
        Ok(self.db.get_inventory_log(key).await?)
    }

    /// Drops the cached copy of an inventory row.
    pub async fn evict(&self, key: StockKey) {
        self.cache.evict(&CachePolicy::inventory_key(key)).await;
    }
}

fn ensure_positive(quantity: i64) -> Result<()> {
    if quantity <= 0 {
        return Err(InventoryError::InvalidQuantity { quantity });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::DEFAULT_CACHE_TTL;
    use common::ProductId;
    use store::{InMemoryCache, InMemoryStore};

    fn key(product: i64) -> StockKey {
        StockKey::new(ProductId::new(product), WarehouseId::new(1))
    }

    async fn setup(stock: i64) -> (InMemoryStore, InventoryLedger<InMemoryStore>) {
        let store = InMemoryStore::new();
        let ledger = InventoryLedger::new(store.clone());
        ledger.register(key(101), stock).await.unwrap();
        (store, ledger)
    }

    #[tokio::test]
    async fn reduce_decrements_and_logs() {
        let (_, ledger) = setup(5).await;

        assert_eq!(ledger.reduce(key(101), 3).await.unwrap(), 2);

        let history = ledger.history(key(101)).await.unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.stock_change, -3);
        assert_eq!(last.reason, REASON_RESERVATION);
    }

    #[tokio::test]
    async fn reduce_rejects_more_than_available() {
        let (_, ledger) = setup(2).await;

        let err = ledger.reduce(key(101), 6).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock {
                requested: 6,
                available: 2,
                ..
            }
        ));
        assert_eq!(ledger.get_inventory(key(101)).await.unwrap().stock, 2);
        assert_eq!(ledger.history(key(101)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reduce_unknown_row_is_not_found() {
        let (_, ledger) = setup(2).await;
        let err = ledger.reduce(key(404), 1).await.unwrap_err();
        assert!(matches!(err, InventoryError::NotFound(k) if k == key(404)));
    }

    #[tokio::test]
    async fn quantities_must_be_positive() {
        let (_, ledger) = setup(2).await;
        for quantity in [0, -1] {
            assert!(matches!(
                ledger.reduce(key(101), quantity).await,
                Err(InventoryError::InvalidQuantity { .. })
            ));
            assert!(matches!(
                ledger.increase(key(101), quantity).await,
                Err(InventoryError::InvalidQuantity { .. })
            ));
        }
    }

    #[tokio::test]
    async fn increase_has_no_upper_bound() {
        let (_, ledger) = setup(0).await;

        assert_eq!(ledger.increase(key(101), 1_000).await.unwrap(), 1_000);

        let history = ledger.history(key(101)).await.unwrap();
        assert_eq!(history.last().unwrap().reason, REASON_REVERSAL);
    }

    #[tokio::test]
    async fn reduce_in_shares_the_caller_transaction() {
        let (store, ledger) = setup(5).await;

        let mut tx = store.begin().await.unwrap();
        ledger.reduce_in(&mut tx, key(101), 4).await.unwrap();
        drop(tx);

        assert_eq!(ledger.get_inventory(key(101)).await.unwrap().stock, 5);
        assert_eq!(ledger.history(key(101)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn register_twice_fails() {
        let (_, ledger) = setup(5).await;
        let err = ledger.register(key(101), 1).await.unwrap_err();
        assert!(matches!(err, InventoryError::AlreadyExists(_)));
        assert!(matches!(
            ledger.register(key(102), -1).await,
            Err(InventoryError::InvalidQuantity { quantity: -1 })
        ));
    }

    #[tokio::test]
    async fn adjust_logs_the_delta() {
        let (_, ledger) = setup(5).await;

        let row = ledger.adjust(key(101), 12).await.unwrap();
        assert_eq!(row.stock, 12);

        ledger.adjust(key(101), 12).await.unwrap();
        let history = ledger.history(key(101)).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].stock_change, 7);
        assert_eq!(history[1].reason, REASON_ADJUSTMENT);

        assert!(matches!(
            ledger.adjust(key(404), 1).await,
            Err(InventoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_in_warehouse_filters_by_warehouse() {
        let (_, ledger) = setup(5).await;
        ledger
            .register(StockKey::new(ProductId::new(101), WarehouseId::new(2)), 1)
            .await
            .unwrap();
        ledger.register(key(100), 1).await.unwrap();

        let rows = ledger.list_in_warehouse(WarehouseId::new(1)).await.unwrap();
        let products: Vec<_> = rows.iter().map(|r| r.product_id.get()).collect();
        assert_eq!(products, vec![100, 101]);
    }

    #[tokio::test]
    async fn cached_reads_are_evicted_by_mutations() {
        let store = InMemoryStore::new();
        let cache = Arc::new(InMemoryCache::new());
        let ledger = InventoryLedger::with_cache(
            store.clone(),
            CachePolicy::new(cache.clone(), DEFAULT_CACHE_TTL),
        );
        ledger.register(key(101), 5).await.unwrap();

        assert_eq!(ledger.get_inventory(key(101)).await.unwrap().stock, 5);
        assert!(cache.contains("101_1_INVENTORY").await);

        ledger.reduce(key(101), 2).await.unwrap();
        assert!(!cache.contains("101_1_INVENTORY").await);
        assert_eq!(ledger.get_inventory(key(101)).await.unwrap().stock, 3);
    }
}
