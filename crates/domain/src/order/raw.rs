use std::collections::BTreeMap;

use common::{CustomerId, ProductId, WarehouseId};
use serde::{Deserialize, Serialize};
use store::OrderStatus;
use thiserror::Error;

/// Unvalidated cart input.
///
/// Accepted JSON shape:
/// ```json
/// { "customer_id": 1, "warehouse_id": 2, "status": "pending",
///   "products": { "101": 3, "205": 1 } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOrder {
    pub customer_id: Option<CustomerId>,
    pub warehouse_id: Option<WarehouseId>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    /// Decimal product id → quantity.
    #[serde(default)]
    pub products: BTreeMap<String, i64>,
}

/// Validation failures of a [`RawOrder`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RawOrderError {
    #[error("customer_id is required")]
    MissingCustomer,

    #[error("warehouse_id is required")]
    MissingWarehouse,

    #[error("order has no products")]
    EmptyCart,

    #[error("'{0}' is not a product id")]
    InvalidProductId(String),

    #[error("product {0} is listed more than once")]
    DuplicateProduct(ProductId),

    #[error("quantity {quantity} for product {product_id} must be greater than 0")]
    InvalidQuantity { product_id: ProductId, quantity: i64 },

    #[error("an order cannot be created as {0}")]
    InvalidStatus(OrderStatus),
}

/// One validated line of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// A validated order, lines sorted by product id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub customer_id: CustomerId,
    pub warehouse_id: WarehouseId,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
}

impl RawOrder {
    pub fn new(customer_id: CustomerId, warehouse_id: WarehouseId) -> Self {
        Self {
            customer_id: Some(customer_id),
            warehouse_id: Some(warehouse_id),
            status: None,
            products: BTreeMap::new(),
        }
    }

    /// Adds a product line, keyed the way the JSON form keys it.
    pub fn with_product(mut self, product_id: ProductId, quantity: i64) -> Self {
        self.products.insert(product_id.to_string(), quantity);
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Checks the cart and resolves product keys.
    pub fn validate(&self) -> Result<OrderRequest, RawOrderError> {
        let customer_id = self.customer_id.ok_or(RawOrderError::MissingCustomer)?;
        let warehouse_id = self.warehouse_id.ok_or(RawOrderError::MissingWarehouse)?;

        let status = self.status.unwrap_or_default();
        if status == OrderStatus::Cancelled {
            return Err(RawOrderError::InvalidStatus(status));
        }

        if self.products.is_empty() {
            return Err(RawOrderError::EmptyCart);
        }

        // "7" and "07" name the same product.
        let mut lines = BTreeMap::new();
        for (raw_id, &quantity) in &self.products {
            let product_id: ProductId = raw_id
                .parse()
                .map_err(|_| RawOrderError::InvalidProductId(raw_id.clone()))?;
            if quantity <= 0 {
                return Err(RawOrderError::InvalidQuantity {
                    product_id,
                    quantity,
                });
            }
            if lines.insert(product_id, quantity).is_some() {
                return Err(RawOrderError::DuplicateProduct(product_id));
            }
        }

        Ok(OrderRequest {
            customer_id,
            warehouse_id,
            status,
            lines: lines
                .into_iter()
                .map(|(product_id, quantity)| OrderLine {
                    product_id,
                    quantity,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart() -> RawOrder {
        RawOrder::new(CustomerId::new(1), WarehouseId::new(2))
    }

    #[test]
    fn parses_the_wire_shape() {
        let raw: RawOrder = serde_json::from_str(
            r#"{ "customer_id": 1, "warehouse_id": 2, "status": "pending",
                 "products": { "205": 1, "101": 3 } }"#,
        )
        .unwrap();

        let request = raw.validate().unwrap();
        assert_eq!(request.customer_id, CustomerId::new(1));
        assert_eq!(request.warehouse_id, WarehouseId::new(2));
        assert_eq!(request.status, OrderStatus::Pending);
        assert_eq!(
            request.lines,
            vec![
                OrderLine {
                    product_id: ProductId::new(101),
                    quantity: 3
                },
                OrderLine {
                    product_id: ProductId::new(205),
                    quantity: 1
                },
            ]
        );
    }

    #[test]
    fn lines_sort_numerically() {
        let request = cart()
            .with_product(ProductId::new(10), 1)
            .with_product(ProductId::new(9), 1)
            .validate()
            .unwrap();
        let ids: Vec<_> = request.lines.iter().map(|l| l.product_id.get()).collect();
        assert_eq!(ids, vec![9, 10]);
    }

    #[test]
    fn status_defaults_to_pending() {
        let raw: RawOrder =
            serde_json::from_str(r#"{ "customer_id": 1, "warehouse_id": 2, "products": { "1": 1 } }"#)
                .unwrap();
        assert_eq!(raw.validate().unwrap().status, OrderStatus::Pending);
    }

    #[test]
    fn requires_customer_and_warehouse() {
        let mut raw = cart().with_product(ProductId::new(1), 1);
        raw.customer_id = None;
        assert_eq!(raw.validate(), Err(RawOrderError::MissingCustomer));

        let mut raw = cart().with_product(ProductId::new(1), 1);
        raw.warehouse_id = None;
        assert_eq!(raw.validate(), Err(RawOrderError::MissingWarehouse));
    }

    #[test]
    fn rejects_empty_cart() {
        assert_eq!(cart().validate(), Err(RawOrderError::EmptyCart));
    }

    #[test]
    fn rejects_non_numeric_product_ids() {
        let mut raw = cart();
        raw.products.insert("abc".to_string(), 1);
        assert_eq!(
            raw.validate(),
            Err(RawOrderError::InvalidProductId("abc".to_string()))
        );
    }

    #[test]
    fn rejects_ids_that_collide_after_parsing() {
        let mut raw = cart();
        raw.products.insert("7".to_string(), 1);
        raw.products.insert("07".to_string(), 2);
        assert_eq!(
            raw.validate(),
            Err(RawOrderError::DuplicateProduct(ProductId::new(7)))
        );
    }

    #[test]
    fn rejects_non_positive_quantities() {
        let err = cart()
            .with_product(ProductId::new(1), 0)
            .validate()
            .unwrap_err();
        assert_eq!(
            err,
            RawOrderError::InvalidQuantity {
                product_id: ProductId::new(1),
                quantity: 0
            }
        );
    }

    #[test]
    fn rejects_cancelled_status() {
        let err = cart()
            .with_product(ProductId::new(1), 1)
            .with_status(OrderStatus::Cancelled)
            .validate()
            .unwrap_err();
        assert_eq!(err, RawOrderError::InvalidStatus(OrderStatus::Cancelled));
    }
}
