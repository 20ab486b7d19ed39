use async_trait::async_trait;
use common::{CustomerId, Money, OrderId, OrderedItemId, ProductId, WarehouseId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::compensation::{
    Compensation, CompensationId, CompensationItem, CompensationState, NewCompensation,
};
use crate::records::{
    Inventory, InventoryLogEntry, NewInventoryLog, NewOrder, NewOrderedItem, Order, OrderStatus,
    OrderedItem, StockDecrement, StockKey,
};
use crate::store::{Database, StoreTransaction};
use crate::Result;

const ORDER_COLUMNS: &str = "id, customer_id, warehouse_id, status, total_cost_cents, \
     total_fees_cents, total_checkout_cents, created_at, updated_at, deleted_at";

const ITEM_COLUMNS: &str =
    "id, order_id, product_id, quantity, unit_price_cents, total_price_cents, created_at, deleted_at";

const INVENTORY_COLUMNS: &str = "product_id, warehouse_id, stock, updated_at";

const COMPENSATION_COLUMNS: &str =
    "id, order_id, warehouse_id, state, attempts, last_error, created_at, updated_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: OrderId::new(row.try_get("id")?),
        customer_id: CustomerId::new(row.try_get("customer_id")?),
        warehouse_id: WarehouseId::new(row.try_get("warehouse_id")?),
        status: status.parse()?,
        total_cost: Money::from_cents(row.try_get("total_cost_cents")?),
        total_fees: Money::from_cents(row.try_get("total_fees_cents")?),
        total_checkout: Money::from_cents(row.try_get("total_checkout_cents")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn row_to_item(row: &PgRow) -> Result<OrderedItem> {
    Ok(OrderedItem {
        id: OrderedItemId::new(row.try_get("id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        product_id: ProductId::new(row.try_get("product_id")?),
        quantity: row.try_get("quantity")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        total_price: Money::from_cents(row.try_get("total_price_cents")?),
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn row_to_inventory(row: &PgRow) -> Result<Inventory> {
    Ok(Inventory {
        product_id: ProductId::new(row.try_get("product_id")?),
        warehouse_id: WarehouseId::new(row.try_get("warehouse_id")?),
        stock: row.try_get("stock")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_log(row: &PgRow) -> Result<InventoryLogEntry> {
    Ok(InventoryLogEntry {
        id: row.try_get("id")?,
        product_id: ProductId::new(row.try_get("product_id")?),
        warehouse_id: WarehouseId::new(row.try_get("warehouse_id")?),
        stock_change: row.try_get("stock_change")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_compensation(row: &PgRow, items: Vec<CompensationItem>) -> Result<Compensation> {
    let state: String = row.try_get("state")?;
    Ok(Compensation {
        id: CompensationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        warehouse_id: WarehouseId::new(row.try_get("warehouse_id")?),
        state: state.parse::<CompensationState>()?,
        items,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_compensation_item(row: &PgRow) -> Result<CompensationItem> {
    let released_at: Option<chrono::DateTime<chrono::Utc>> = row.try_get("released_at")?;
    Ok(CompensationItem {
        product_id: ProductId::new(row.try_get("product_id")?),
        quantity: row.try_get("quantity")?,
        released: released_at.is_some(),
    })
}

async fn compensation_items<'e, E>(executor: E, id: CompensationId) -> Result<Vec<CompensationItem>>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query(
        r#"
        SELECT product_id, quantity, released_at
        FROM compensation_items
        WHERE compensation_id = $1
        ORDER BY product_id ASC
        "#,
    )
    .bind(id.as_uuid())
    .fetch_all(executor)
    .await?;

    rows.iter().map(row_to_compensation_item).collect()
}

#[async_trait]
impl Database for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
        })
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE deleted_at IS NULL ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_order).collect()
    }

    async fn get_ordered_items(&self, order_id: OrderId) -> Result<Vec<OrderedItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM ordered_items \
             WHERE order_id = $1 AND deleted_at IS NULL ORDER BY product_id ASC"
        ))
        .bind(order_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_item).collect()
    }

    async fn get_inventory(&self, key: StockKey) -> Result<Option<Inventory>> {
        let row = sqlx::query(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory WHERE product_id = $1 AND warehouse_id = $2"
        ))
        .bind(key.product_id.get())
        .bind(key.warehouse_id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_inventory).transpose()
    }

    async fn list_inventory(&self, warehouse_id: WarehouseId) -> Result<Vec<Inventory>> {
        let rows = sqlx::query(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory WHERE warehouse_id = $1 ORDER BY product_id ASC"
        ))
        .bind(warehouse_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_inventory).collect()
    }

    async fn get_inventory_log(&self, key: StockKey) -> Result<Vec<InventoryLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, warehouse_id, stock_change, reason, created_at
            FROM inventory_log
            WHERE product_id = $1 AND warehouse_id = $2
            ORDER BY id ASC
            "#,
        )
        .bind(key.product_id.get())
        .bind(key.warehouse_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_log).collect()
    }

    async fn get_compensation(&self, id: CompensationId) -> Result<Option<Compensation>> {
        let row = sqlx::query(&format!(
            "SELECT {COMPENSATION_COLUMNS} FROM compensations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let items = compensation_items(&self.pool, id).await?;
                Ok(Some(row_to_compensation(&row, items)?))
            }
            None => Ok(None),
        }
    }

    async fn list_open_compensations(&self) -> Result<Vec<Compensation>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMPENSATION_COLUMNS} FROM compensations \
             WHERE state <> 'completed' ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut open = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = CompensationId::from_uuid(row.try_get::<Uuid, _>("id")?);
            let items = compensation_items(&self.pool, id).await?;
            open.push(row_to_compensation(row, items)?);
        }
        Ok(open)
    }
}

/// Transaction over a [`PostgresStore`].
///
/// Wraps a `sqlx` transaction, which rolls back when dropped uncommitted.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    /// Subtracts `quantity` if enough stock remains, returning the new stock.
    ///
    /// Check and write are one statement so the row lock covers both.
    async fn conditional_decrement(
        &mut self,
        key: StockKey,
        quantity: i64,
    ) -> Result<Option<i64>> {
        let remaining = sqlx::query_scalar(
            r#"
            UPDATE inventory
            SET stock = stock - $3, updated_at = NOW()
            WHERE product_id = $1 AND warehouse_id = $2 AND stock >= $3
            RETURNING stock
            "#,
        )
        .bind(key.product_id.get())
        .bind(key.warehouse_id.get())
        .bind(quantity)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(remaining)
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let row = sqlx::query(&format!(
            "INSERT INTO orders (customer_id, warehouse_id, status, total_cost_cents, \
             total_fees_cents, total_checkout_cents) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.customer_id.get())
        .bind(order.warehouse_id.get())
        .bind(order.status.as_str())
        .bind(order.total_cost.cents())
        .bind(order.total_fees.cents())
        .bind(order.total_checkout.cents())
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_order(&row)
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn update_order(&mut self, order: &Order) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "UPDATE orders SET status = $2, total_cost_cents = $3, total_fees_cents = $4, \
             total_checkout_cents = $5, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.id.get())
        .bind(order.status.as_str())
        .bind(order.total_cost.cents())
        .bind(order.total_fees.cents())
        .bind(order.total_checkout.cents())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn soft_delete_order(&mut self, id: OrderId, status: OrderStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, updated_at = NOW(), deleted_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.get())
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_ordered_item(&mut self, item: NewOrderedItem) -> Result<OrderedItem> {
        let row = sqlx::query(&format!(
            "INSERT INTO ordered_items (order_id, product_id, quantity, unit_price_cents, \
             total_price_cents) VALUES ($1, $2, $3, $4, $5) RETURNING {ITEM_COLUMNS}"
        ))
        .bind(item.order_id.get())
        .bind(item.product_id.get())
        .bind(item.quantity)
        .bind(item.unit_price.cents())
        .bind(item.total_price.cents())
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_item(&row)
    }

    async fn ordered_items(&mut self, order_id: OrderId) -> Result<Vec<OrderedItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM ordered_items \
             WHERE order_id = $1 AND deleted_at IS NULL ORDER BY product_id ASC"
        ))
        .bind(order_id.get())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_item).collect()
    }

    async fn soft_delete_ordered_items(&mut self, order_id: OrderId) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE ordered_items SET deleted_at = NOW() WHERE order_id = $1 AND deleted_at IS NULL",
        )
        .bind(order_id.get())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_inventory(&mut self, key: StockKey, stock: i64) -> Result<Option<Inventory>> {
        let row = sqlx::query(&format!(
            "INSERT INTO inventory (product_id, warehouse_id, stock) VALUES ($1, $2, $3) \
             ON CONFLICT (product_id, warehouse_id) DO NOTHING RETURNING {INVENTORY_COLUMNS}"
        ))
        .bind(key.product_id.get())
        .bind(key.warehouse_id.get())
        .bind(stock)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_inventory).transpose()
    }

    async fn decrement_stock(&mut self, key: StockKey, quantity: i64) -> Result<StockDecrement> {
        if let Some(stock) = self.conditional_decrement(key, quantity).await? {
            return Ok(StockDecrement::Applied { stock });
        }

        // The update saw too little stock or no row. Lock the row to read its
        // latest committed stock, which a release may have raised meanwhile.
        let locked: Option<i64> = sqlx::query_scalar(
            "SELECT stock FROM inventory WHERE product_id = $1 AND warehouse_id = $2 FOR UPDATE",
        )
        .bind(key.product_id.get())
        .bind(key.warehouse_id.get())
        .fetch_optional(&mut *self.tx)
        .await?;

        match locked {
            None => Ok(StockDecrement::Missing),
            Some(available) if available < quantity => {
                Ok(StockDecrement::Insufficient { available })
            }
            // The row is locked by this transaction, so the retry sees `available`.
            Some(available) => match self.conditional_decrement(key, quantity).await? {
                Some(stock) => Ok(StockDecrement::Applied { stock }),
                None => Ok(StockDecrement::Insufficient { available }),
            },
        }
    }

    async fn increment_stock(&mut self, key: StockKey, quantity: i64) -> Result<Option<i64>> {
        let stock = sqlx::query_scalar(
            r#"
            UPDATE inventory
            SET stock = stock + $3, updated_at = NOW()
            WHERE product_id = $1 AND warehouse_id = $2
            RETURNING stock
            "#,
        )
        .bind(key.product_id.get())
        .bind(key.warehouse_id.get())
        .bind(quantity)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(stock)
    }

    async fn set_stock(&mut self, key: StockKey, stock: i64) -> Result<Option<i64>> {
        let previous: Option<i64> = sqlx::query_scalar(
            "SELECT stock FROM inventory WHERE product_id = $1 AND warehouse_id = $2 FOR UPDATE",
        )
        .bind(key.product_id.get())
        .bind(key.warehouse_id.get())
        .fetch_optional(&mut *self.tx)
        .await?;

        if previous.is_some() {
            sqlx::query(
                r#"
                UPDATE inventory
                SET stock = $3, updated_at = NOW()
                WHERE product_id = $1 AND warehouse_id = $2
                "#,
            )
            .bind(key.product_id.get())
            .bind(key.warehouse_id.get())
            .bind(stock)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(previous)
    }

    async fn append_inventory_log(&mut self, entry: NewInventoryLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_log (product_id, warehouse_id, stock_change, reason)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entry.key.product_id.get())
        .bind(entry.key.warehouse_id.get())
        .bind(entry.stock_change)
        .bind(&entry.reason)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_compensation(
        &mut self,
        compensation: NewCompensation,
    ) -> Result<Compensation> {
        let id = CompensationId::new();
        let row = sqlx::query(&format!(
            "INSERT INTO compensations (id, order_id, warehouse_id, state) \
             VALUES ($1, $2, $3, $4) RETURNING {COMPENSATION_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(compensation.order_id.get())
        .bind(compensation.warehouse_id.get())
        .bind(CompensationState::Pending.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        let mut items = Vec::with_capacity(compensation.items.len());
        for (product_id, quantity) in compensation.items {
            sqlx::query(
                r#"
                INSERT INTO compensation_items (compensation_id, product_id, quantity)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(id.as_uuid())
            .bind(product_id.get())
            .bind(quantity)
            .execute(&mut *self.tx)
            .await?;

            items.push(CompensationItem {
                product_id,
                quantity,
                released: false,
            });
        }

        row_to_compensation(&row, items)
    }

    async fn lock_compensation(&mut self, id: CompensationId) -> Result<Option<Compensation>> {
        let row = sqlx::query(&format!(
            "SELECT {COMPENSATION_COLUMNS} FROM compensations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => {
                let items = compensation_items(&mut *self.tx, id).await?;
                Ok(Some(row_to_compensation(&row, items)?))
            }
            None => Ok(None),
        }
    }

    async fn release_compensation_item(
        &mut self,
        id: CompensationId,
        product_id: ProductId,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE compensation_items
            SET released_at = NOW()
            WHERE compensation_id = $1 AND product_id = $2 AND released_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(product_id.get())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_compensation(
        &mut self,
        id: CompensationId,
        state: CompensationState,
        attempts: i32,
        last_error: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE compensations
            SET state = $2, attempts = $3, last_error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(state.as_str())
        .bind(attempts)
        .bind(last_error)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
