//! Product catalogue: the source of unit prices at order time.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{Money, ProductId};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

use crate::Result;

/// A sellable product and its current unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
}

impl Product {
    pub fn new(id: ProductId, name: impl Into<String>, price: Money) -> Self {
        Self {
            id,
            name: name.into(),
            price,
        }
    }
}

/// Looks up products by id.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Returns the product, or `None` if the id is unknown.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;
}

/// Catalogue held in memory, for tests.
#[derive(Clone, Default)]
pub struct InMemoryProductCatalog {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a product.
    pub fn insert(&self, product: Product) {
        self.products
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(product.id, product);
    }

    /// Removes a product; later lookups return `None`.
    pub fn remove(&self, id: ProductId) {
        self.products
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let products = self.products.read().unwrap_or_else(PoisonError::into_inner);
        Ok(products.get(&id).cloned())
    }
}

/// Catalogue backed by the `products` table.
#[derive(Clone)]
pub struct PostgresProductCatalog {
    pool: PgPool,
}

impl PostgresProductCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a product or updates its name and price.
    pub async fn upsert(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, price_cents = EXCLUDED.price_cents, updated_at = NOW()
            "#,
        )
        .bind(product.id.get())
        .bind(&product.name)
        .bind(product.price.cents())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ProductCatalog for PostgresProductCatalog {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT id, name, price_cents FROM products WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Product {
                id: ProductId::new(row.try_get("id")?),
                name: row.try_get("name")?,
                price: Money::from_cents(row.try_get("price_cents")?),
            })),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_lookup() {
        let catalog = InMemoryProductCatalog::new();
        catalog.insert(Product::new(
            ProductId::new(101),
            "Widget",
            Money::from_cents(1000),
        ));

        let product = catalog.get_product(ProductId::new(101)).await.unwrap();
        assert_eq!(product.unwrap().price, Money::from_cents(1000));
        assert!(
            catalog
                .get_product(ProductId::new(102))
                .await
                .unwrap()
                .is_none()
        );

        catalog.remove(ProductId::new(101));
        assert!(
            catalog
                .get_product(ProductId::new(101))
                .await
                .unwrap()
                .is_none()
        );
    }
}
