//! Order deletion saga.

use common::OrderId;
use domain::CachePolicy;
use store::{
    Compensation, CompensationId, CompensationState, Database, NewCompensation, OrderStatus,
    StoreTransaction,
};

use crate::error::{CompensationError, Result};
use crate::reversal::OrderReversal;

/// Counts from one pass over open compensations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeSummary {
    /// Compensations that reached `Completed`.
    pub completed: usize,
    /// Compensations left `Failed` after this pass.
    pub failed: usize,
    /// Compensations another runner finished first.
    pub skipped: usize,
}

impl ResumeSummary {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.skipped
    }
}

/// Deletes orders and returns their stock.
///
/// The deletion transaction records a pending [`Compensation`] next to the
/// soft-deleted order, so stock owed back survives a crash between the
/// deletion and the release. Releases then run item by item and can be
/// replayed until the compensation completes.
pub struct OrderCancellation<D> {
    db: D,
    reversal: OrderReversal<D>,
    cache: CachePolicy,
}

impl<D: Database + Clone> OrderCancellation<D> {
    /// Creates a cancellation saga without caching.
    pub fn new(db: D) -> Self {
        Self::with_cache(db, CachePolicy::disabled())
    }

    pub fn with_cache(db: D, cache: CachePolicy) -> Self {
        let reversal = OrderReversal::with_cache(db.clone(), cache.clone());
        Self {
            db,
            reversal,
            cache,
        }
    }

    /// Returns the reversal used to release items.
    pub fn reversal(&self) -> &OrderReversal<D> {
        &self.reversal
    }

    /// Deletes a live order and returns its stock.
    ///
    /// Returns the completed compensation, or
    /// [`CompensationError::PartialReversal`] naming the items still owed; the
    /// order is deleted either way and the compensation can be resumed.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<Compensation> {
        let mut tx = self
            .db
            .begin()
            .await
            .map_err(CompensationError::Transaction)?;

        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or(CompensationError::OrderNotFound(order_id))?;
        let items = tx.ordered_items(order_id).await?;

        let compensation = tx
            .insert_compensation(NewCompensation {
                order_id,
                warehouse_id: order.warehouse_id,
                items: items
                    .iter()
                    .map(|item| (item.product_id, item.quantity))
                    .collect(),
            })
            .await?;
        tx.soft_delete_order(order_id, OrderStatus::Cancelled)
            .await?;
        tx.soft_delete_ordered_items(order_id).await?;

        tx.commit()
            .await
            .map_err(CompensationError::Transaction)?;

        metrics::counter!("order_cancellations_total").increment(1);
        self.cache.evict(&CachePolicy::order_key(order_id)).await;
        tracing::info!(
            %order_id,
            compensation_id = %compensation.id,
            items = items.len(),
            "order deleted, compensation recorded"
        );

        self.settle(compensation).await
    }

    /// Replays the unreleased items of one compensation.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, id: CompensationId) -> Result<Compensation> {
        let compensation = self
            .db
            .get_compensation(id)
            .await?
            .ok_or(CompensationError::CompensationNotFound(id))?;
        if compensation.state.is_terminal() {
            return Err(CompensationError::AlreadyCompleted(id));
        }
        self.settle(compensation).await
    }

    /// Replays every compensation that is not completed, oldest first.
    ///
    /// A failing compensation does not stop the pass; only a failure to list
    /// the open compensations is returned as an error.
    #[tracing::instrument(skip(self))]
    pub async fn resume_pending(&self) -> Result<ResumeSummary> {
        let open = self.db.list_open_compensations().await?;
        let mut summary = ResumeSummary::default();

        for compensation in open {
            let id = compensation.id;
            match self.settle(compensation).await {
                Ok(_) => summary.completed += 1,
                Err(CompensationError::AlreadyCompleted(_)) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!(compensation_id = %id, error = %e, "compensation still open");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Releases what is owed and records the outcome on the compensation.
    async fn settle(&self, compensation: Compensation) -> Result<Compensation> {
        let report = self.reversal.replay(&compensation).await;
        let id = compensation.id;

        let mut tx = self
            .db
            .begin()
            .await
            .map_err(CompensationError::Transaction)?;
        let current = tx
            .lock_compensation(id)
            .await?
            .ok_or(CompensationError::CompensationNotFound(id))?;
        if current.state.is_terminal() {
            tx.rollback().await?;
            return Err(CompensationError::AlreadyCompleted(id));
        }

        let outstanding = current.unreleased_items().count();
        let (state, last_error) = if outstanding == 0 {
            (CompensationState::Completed, None)
        } else if report.is_complete() {
            (
                CompensationState::Failed,
                Some(format!("{outstanding} item(s) still held by another release")),
            )
        } else {
            (CompensationState::Failed, Some(report.summary()))
        };
        let attempts = current.attempts + 1;
        tx.update_compensation(id, state, attempts, last_error)
            .await?;
        tx.commit()
            .await
            .map_err(CompensationError::Transaction)?;

        let settled = self
            .db
            .get_compensation(id)
            .await?
            .ok_or(CompensationError::CompensationNotFound(id))?;

        if state == CompensationState::Completed {
            metrics::counter!("compensations_completed_total").increment(1);
            tracing::info!(
                compensation_id = %id,
                order_id = %settled.order_id,
                attempts,
                "compensation completed"
            );
            return Ok(settled);
        }

        tracing::warn!(
            compensation_id = %id,
            order_id = %settled.order_id,
            attempts,
            outstanding,
            "compensation failed, will be replayed"
        );
        report.into_result(settled.order_id, id)?;
        Ok(settled)
    }
}
