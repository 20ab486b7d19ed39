//! Pending stock compensations recorded when an order is deleted.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, WarehouseId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::records::StockKey;

/// Unique identifier for a compensation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompensationId(Uuid);

impl CompensationId {
    /// Creates a new random compensation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a compensation ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CompensationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CompensationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The state of a compensation in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Completed
///           └──► Failed ──┬──► Completed
///                 ▲       │
///                 └───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CompensationState {
    /// Recorded together with the order deletion, no release attempted yet.
    #[default]
    Pending,

    /// Every item has been returned to stock (terminal state).
    Completed,

    /// At least one release failed; the record can be replayed.
    Failed,
}

impl CompensationState {
    /// Returns true if unreleased items may still be replayed.
    pub fn can_resume(&self) -> bool {
        matches!(self, CompensationState::Pending | CompensationState::Failed)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompensationState::Completed)
    }

    /// Returns the state name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationState::Pending => "pending",
            CompensationState::Completed => "completed",
            CompensationState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CompensationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CompensationState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CompensationState::Pending),
            "completed" => Ok(CompensationState::Completed),
            "failed" => Ok(CompensationState::Failed),
            other => Err(StoreError::Corrupt(format!(
                "unknown compensation state '{other}'"
            ))),
        }
    }
}

/// One stock release owed by a compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationItem {
    pub product_id: ProductId,
    pub quantity: i64,
    pub released: bool,
}

/// Durable record of the stock owed back after an order deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compensation {
    pub id: CompensationId,
    pub order_id: OrderId,
    pub warehouse_id: WarehouseId,
    pub state: CompensationState,
    pub items: Vec<CompensationItem>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Compensation {
    /// Items whose stock has not been returned yet.
    pub fn unreleased_items(&self) -> impl Iterator<Item = &CompensationItem> {
        self.items.iter().filter(|item| !item.released)
    }

    /// Inventory row an item is returned to.
    pub fn stock_key(&self, product_id: ProductId) -> StockKey {
        StockKey::new(product_id, self.warehouse_id)
    }
}

/// Values for recording a compensation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCompensation {
    pub order_id: OrderId,
    pub warehouse_id: WarehouseId,
    /// `(product, quantity)` pairs, one per distinct product.
    pub items: Vec<(ProductId, i64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_pending() {
        assert_eq!(CompensationState::default(), CompensationState::Pending);
    }

    #[test]
    fn test_can_resume() {
        assert!(CompensationState::Pending.can_resume());
        assert!(CompensationState::Failed.can_resume());
        assert!(!CompensationState::Completed.can_resume());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!CompensationState::Pending.is_terminal());
        assert!(!CompensationState::Failed.is_terminal());
        assert!(CompensationState::Completed.is_terminal());
    }

    #[test]
    fn test_column_values() {
        for state in [
            CompensationState::Pending,
            CompensationState::Completed,
            CompensationState::Failed,
        ] {
            assert_eq!(state.to_string().parse::<CompensationState>().unwrap(), state);
        }
        assert!("compensating".parse::<CompensationState>().is_err());
    }

    #[test]
    fn test_unreleased_items() {
        let compensation = Compensation {
            id: CompensationId::new(),
            order_id: OrderId::new(1),
            warehouse_id: WarehouseId::new(2),
            state: CompensationState::Failed,
            items: vec![
                CompensationItem {
                    product_id: ProductId::new(101),
                    quantity: 3,
                    released: true,
                },
                CompensationItem {
                    product_id: ProductId::new(205),
                    quantity: 1,
                    released: false,
                },
            ],
            attempts: 1,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let pending: Vec<_> = compensation.unreleased_items().collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].product_id, ProductId::new(205));
        assert_eq!(
            compensation.stock_key(ProductId::new(205)),
            StockKey::new(ProductId::new(205), WarehouseId::new(2))
        );
    }
}
