//! Transactional order placement.

use std::time::Instant;

use common::{Money, OrderId, ProductId};
use serde::{Deserialize, Serialize};
use store::{
    Database, NewOrder, NewOrderedItem, Order, OrderStatus, OrderedItem, ProductCatalog,
    StockKey, StoreTransaction,
};

use super::{OrderError, OrderLine, RawOrder};
use crate::cache::CachePolicy;
use crate::ledger::InventoryLedger;

type Result<T> = std::result::Result<T, OrderError>;

/// Fields of an order that may change after placement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub total_fees: Option<Money>,
}

#[derive(Debug, Clone, Copy)]
struct PricedLine {
    product_id: ProductId,
    quantity: i64,
    unit_price: Money,
    total_price: Money,
}

/// Places orders and maintains them afterwards.
///
/// Placement is all-or-nothing: the order row, every ordered item and every
/// stock reservation share one transaction.
pub struct OrderCoordinator<D, C> {
    db: D,
    catalog: C,
    ledger: InventoryLedger<D>,
    cache: CachePolicy,
}

impl<D, C> OrderCoordinator<D, C>
where
    D: Database + Clone,
    C: ProductCatalog,
{
    /// Creates a coordinator without caching.
    pub fn new(db: D, catalog: C) -> Self {
        Self::with_cache(db, catalog, CachePolicy::disabled())
    }

    pub fn with_cache(db: D, catalog: C, cache: CachePolicy) -> Self {
        let ledger = InventoryLedger::with_cache(db.clone(), cache.clone());
        Self {
            db,
            catalog,
            ledger,
            cache,
        }
    }

    /// Returns the ledger used for reservations.
    pub fn ledger(&self) -> &InventoryLedger<D> {
        &self.ledger
    }

    /// Converts a raw cart into a persisted order, reserving stock for every line.
    ///
    /// On any failure nothing is persisted and the first error is returned.
    #[tracing::instrument(
        skip(self, raw),
        fields(customer_id = tracing::field::Empty, warehouse_id = tracing::field::Empty)
    )]
    pub async fn place_order(&self, raw: RawOrder) -> Result<Order> {
        let start = Instant::now();
        let result = self.try_place_order(raw).await;
        let duration = start.elapsed().as_secs_f64();

        match &result {
            Ok(order) => {
                metrics::counter!("orders_placed_total").increment(1);
                metrics::histogram!("order_placement_duration_seconds").record(duration);
                tracing::info!(
                    order_id = %order.id,
                    total_checkout = %order.total_checkout,
                    duration,
                    "order placed"
                );
            }
            Err(e) => {
                metrics::counter!("order_placement_failures_total", "reason" => e.reason())
                    .increment(1);
                tracing::warn!(error = %e, reason = e.reason(), "order placement failed");
            }
        }

        result
    }

    async fn try_place_order(&self, raw: RawOrder) -> Result<Order> {
        let request = raw.validate()?;
        let span = tracing::Span::current();
        span.record("customer_id", request.customer_id.get());
        span.record("warehouse_id", request.warehouse_id.get());

        // Prices resolve before any write so an unknown product never opens a transaction.
        let lines = self.price_lines(&request.lines).await?;
        let total_cost = lines
            .iter()
            .try_fold(Money::zero(), |sum, line| sum.checked_add(line.total_price))
            .ok_or(OrderError::Overflow)?;
        let total_fees = Money::zero();
        let total_checkout = total_cost
            .checked_add(total_fees)
            .ok_or(OrderError::Overflow)?;

        let mut tx = self.db.begin().await.map_err(OrderError::Transaction)?;

        let order = tx
            .insert_order(NewOrder {
                customer_id: request.customer_id,
                warehouse_id: request.warehouse_id,
                status: request.status,
                total_cost,
                total_fees,
                total_checkout,
            })
            .await?;

        for line in &lines {
            let key = StockKey::new(line.product_id, request.warehouse_id);
            self.ledger.reduce_in(&mut tx, key, line.quantity).await?;
            tx.insert_ordered_item(NewOrderedItem {
                order_id: order.id,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                total_price: line.total_price,
            })
            .await?;
        }

        tx.commit().await.map_err(OrderError::Transaction)?;

        self.cache_live_order(&order).await;
        for line in &lines {
            self.ledger
                .evict(StockKey::new(line.product_id, request.warehouse_id))
                .await;
        }

        Ok(order)
    }

    async fn price_lines(&self, lines: &[OrderLine]) -> Result<Vec<PricedLine>> {
        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self
                .catalog
                .get_product(line.product_id)
                .await?
                .ok_or(OrderError::ProductNotFound(line.product_id))?;
            let total_price = product
                .price
                .checked_mul(line.quantity)
                .ok_or(OrderError::Overflow)?;
            priced.push(PricedLine {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: product.price,
                total_price,
            });
        }
        Ok(priced)
    }

    /// Reads a live order, through the cache.
    pub async fn get_order(&self, id: OrderId) -> Result<Order> {
        let key = CachePolicy::order_key(id);
        if let Some(order) = self.cache.load::<Order>(&key).await {
            return Ok(order);
        }

        let order = self.db.get_order(id).await?.ok_or(OrderError::NotFound(id))?;
        self.cache_live_order(&order).await;
        Ok(order)
    }

    /// Caches an order, then evicts it again if a deletion committed meanwhile.
    ///
    /// A deletion evicts after its commit, so re-reading after the write
    /// either sees the deletion or the deletion's eviction follows the write.
    async fn cache_live_order(&self, order: &Order) {
        if !self.cache.is_enabled() {
            return;
        }
        let key = CachePolicy::order_key(order.id);
        self.cache.store(&key, order).await;

        match self.db.get_order(order.id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(order_id = %order.id, "order deleted while caching, evicting");
                self.cache.evict(&key).await;
            }
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "liveness check failed, evicting");
                self.cache.evict(&key).await;
            }
        }
    }

    /// Lists live orders, ascending by id.
    pub async fn list_orders(&self) -> Result<Vec<Order>> {
        Ok(self.db.list_orders().await?)
    }

    /// Lists the items of a live order, ascending by product id.
    pub async fn get_ordered_items(&self, order_id: OrderId) -> Result<Vec<OrderedItem>> {
        if self.db.get_order(order_id).await?.is_none() {
            return Err(OrderError::NotFound(order_id));
        }
        Ok(self.db.get_ordered_items(order_id).await?)
    }

    /// Changes the status or fees of a live order.
    ///
    /// `total_checkout` is recomputed from the stored cost and the new fees.
    #[tracing::instrument(skip(self))]
    pub async fn update_order(&self, id: OrderId, update: OrderUpdate) -> Result<Order> {
        if update.status.is_none() && update.total_fees.is_none() {
            return Err(OrderError::InvalidUpdate("nothing to update".to_string()));
        }
        if update.status == Some(OrderStatus::Cancelled) {
            return Err(OrderError::InvalidUpdate(
                "orders are cancelled by deleting them".to_string(),
            ));
        }
        if update.total_fees.is_some_and(|fees| fees.is_negative()) {
            return Err(OrderError::InvalidUpdate(
                "total_fees cannot be negative".to_string(),
            ));
        }

        let mut tx = self.db.begin().await.map_err(OrderError::Transaction)?;
        let mut order = tx.lock_order(id).await?.ok_or(OrderError::NotFound(id))?;

        if let Some(status) = update.status {
            order.status = status;
        }
        if let Some(fees) = update.total_fees {
            order.total_fees = fees;
        }
        order.total_checkout = order
            .total_cost
            .checked_add(order.total_fees)
            .ok_or(OrderError::Overflow)?;

        let order = tx
            .update_order(&order)
            .await?
            .ok_or(OrderError::NotFound(id))?;
        tx.commit().await.map_err(OrderError::Transaction)?;

        self.cache_live_order(&order).await;
        tracing::info!(order_id = %id, status = %order.status, "order updated");
        Ok(order)
    }
}
