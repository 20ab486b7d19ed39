//! Returning reserved stock for deleted orders.

use std::collections::BTreeMap;

use common::{OrderId, ProductId, WarehouseId};
use domain::{CachePolicy, InventoryError, InventoryLedger};
use serde::{Deserialize, Serialize};
use store::{
    Compensation, CompensationId, CompensationItem, Database, OrderedItem, StockKey,
    StoreTransaction,
};

use crate::error::CompensationError;

/// Why a single item could not be returned to stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalFailureKind {
    /// The inventory row for the product and warehouse is gone.
    InventoryNotFound,
    /// The recorded quantity is not positive.
    InvalidQuantity,
    /// The store failed.
    Store,
    /// The ledger refused the release for another reason.
    Rejected,
}

impl From<&InventoryError> for ReversalFailureKind {
    fn from(err: &InventoryError) -> Self {
        match err {
            InventoryError::NotFound(_) => ReversalFailureKind::InventoryNotFound,
            InventoryError::InvalidQuantity { .. } => ReversalFailureKind::InvalidQuantity,
            InventoryError::Store(_) => ReversalFailureKind::Store,
            _ => ReversalFailureKind::Rejected,
        }
    }
}

/// One item whose stock was not returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalFailure {
    pub product_id: ProductId,
    pub quantity: i64,
    pub kind: ReversalFailureKind,
    pub message: String,
}

impl ReversalFailure {
    fn new(product_id: ProductId, quantity: i64, err: &InventoryError) -> Self {
        Self {
            product_id,
            quantity,
            kind: err.into(),
            message: err.to_string(),
        }
    }
}

/// Outcome of a reversal pass.
///
/// A failing item never stops the remaining ones, so a report can hold both
/// released items and failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalReport {
    /// Items returned to stock by this pass.
    pub released: Vec<ProductId>,
    /// Items another pass had already returned.
    pub skipped: Vec<ProductId>,
    pub failures: Vec<ReversalFailure>,
}

impl ReversalReport {
    /// Returns true if no item failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures keyed `product_<id>`, the shape order-deletion callers report.
    pub fn error_map(&self) -> BTreeMap<String, String> {
        self.failures
            .iter()
            .map(|f| (format!("product_{}", f.product_id), f.message.clone()))
            .collect()
    }

    /// One-line description of every failure.
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("product {}: {}", f.product_id, f.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Converts a report with failures into [`CompensationError::PartialReversal`].
    pub fn into_result(
        self,
        order_id: OrderId,
        compensation_id: CompensationId,
    ) -> Result<(), CompensationError> {
        if self.failures.is_empty() {
            return Ok(());
        }
        Err(CompensationError::PartialReversal {
            order_id,
            compensation_id,
            failures: self.failures,
        })
    }
}

/// Returns order quantities to stock through the inventory ledger.
#[derive(Clone)]
pub struct OrderReversal<D> {
    db: D,
    ledger: InventoryLedger<D>,
}

impl<D: Database + Clone> OrderReversal<D> {
    /// Creates a reversal without caching.
    pub fn new(db: D) -> Self {
        Self::with_cache(db, CachePolicy::disabled())
    }

    pub fn with_cache(db: D, cache: CachePolicy) -> Self {
        let ledger = InventoryLedger::with_cache(db.clone(), cache);
        Self { db, ledger }
    }

    /// Best-effort pass over order items, one standalone increase per item.
    ///
    /// Nothing is recorded about the pass; a lost report means lost drift
    /// information. Order deletion goes through
    /// [`OrderCancellation`](crate::OrderCancellation) instead.
    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    pub async fn reverse_order(
        &self,
        warehouse_id: WarehouseId,
        items: &[OrderedItem],
    ) -> ReversalReport {
        let mut report = ReversalReport::default();
        for item in items {
            let key = StockKey::new(item.product_id, warehouse_id);
            match self.ledger.increase(key, item.quantity).await {
                Ok(_) => report.released.push(item.product_id),
                Err(e) => {
                    record_failure(&e, item.product_id);
                    report
                        .failures
                        .push(ReversalFailure::new(item.product_id, item.quantity, &e));
                }
            }
        }
        report
    }

    /// Releases every unreleased item of a compensation.
    ///
    /// Each item commits on its own together with its released mark, so a
    /// replay never returns the same item twice.
    #[tracing::instrument(skip(self, compensation), fields(compensation_id = %compensation.id))]
    pub async fn replay(&self, compensation: &Compensation) -> ReversalReport {
        let mut report = ReversalReport::default();
        for item in compensation.unreleased_items() {
            match self.release_item(compensation, item).await {
                Ok(true) => report.released.push(item.product_id),
                Ok(false) => report.skipped.push(item.product_id),
                Err(e) => {
                    record_failure(&e, item.product_id);
                    report
                        .failures
                        .push(ReversalFailure::new(item.product_id, item.quantity, &e));
                }
            }
        }
        report
    }

    async fn release_item(
        &self,
        compensation: &Compensation,
        item: &CompensationItem,
    ) -> Result<bool, InventoryError> {
        let mut tx = self.db.begin().await?;
        if !tx
            .release_compensation_item(compensation.id, item.product_id)
            .await?
        {
            tx.rollback().await?;
            return Ok(false);
        }

        let key = compensation.stock_key(item.product_id);
        self.ledger.increase_in(&mut tx, key, item.quantity).await?;
        tx.commit().await?;

        self.ledger.evict(key).await;
        Ok(true)
    }
}

fn record_failure(err: &InventoryError, product_id: ProductId) {
    metrics::counter!("compensation_item_failures_total").increment(1);
    tracing::warn!(%product_id, error = %err, "stock release failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(product: i64) -> ReversalFailure {
        ReversalFailure {
            product_id: ProductId::new(product),
            quantity: 1,
            kind: ReversalFailureKind::InventoryNotFound,
            message: "Inventory not found".to_string(),
        }
    }

    #[test]
    fn empty_report_is_complete() {
        let report = ReversalReport::default();
        assert!(report.is_complete());
        assert!(
            report
                .into_result(OrderId::new(1), CompensationId::new())
                .is_ok()
        );
    }

    #[test]
    fn error_map_uses_product_keys() {
        let report = ReversalReport {
            released: vec![ProductId::new(101)],
            skipped: vec![],
            failures: vec![failure(205)],
        };
        let map = report.error_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map["product_205"], "Inventory not found");
        assert_eq!(report.summary(), "product 205: Inventory not found");
    }

    #[test]
    fn failures_become_a_partial_reversal() {
        let report = ReversalReport {
            failures: vec![failure(205), failure(300)],
            ..Default::default()
        };
        let err = report
            .into_result(OrderId::new(9), CompensationId::new())
            .unwrap_err();
        match err {
            CompensationError::PartialReversal {
                order_id, failures, ..
            } => {
                assert_eq!(order_id, OrderId::new(9));
                assert_eq!(failures.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failure_kind_from_inventory_error() {
        let key = StockKey::new(ProductId::new(1), WarehouseId::new(1));
        assert_eq!(
            ReversalFailureKind::from(&InventoryError::NotFound(key)),
            ReversalFailureKind::InventoryNotFound
        );
        assert_eq!(
            ReversalFailureKind::from(&InventoryError::InvalidQuantity { quantity: 0 }),
            ReversalFailureKind::InvalidQuantity
        );
        assert_eq!(
            ReversalFailureKind::from(&InventoryError::AlreadyExists(key)),
            ReversalFailureKind::Rejected
        );
    }

    #[test]
    fn failure_kind_serializes_in_snake_case() {
        assert_eq!(
            serde_json::to_string(&ReversalFailureKind::InventoryNotFound).unwrap(),
            "\"inventory_not_found\""
        );
    }
}
