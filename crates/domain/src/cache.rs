//! Best-effort caching of order and inventory rows.

use std::sync::Arc;
use std::time::Duration;

use common::OrderId;
use serde::{Serialize, de::DeserializeOwned};
use store::{Cache, CacheExt, StockKey};

/// How long cached rows stay valid unless configured otherwise.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Cache access that never fails the caller.
///
/// Read errors and undecodable entries count as misses; write and eviction
/// errors are logged and dropped. A policy without a backend does nothing.
///
/// A write can land after a concurrent writer's eviction and leave a stale
/// row behind. Callers caching a row that another transaction may delete
/// re-read it after [`store`](Self::store) and evict on a miss.
#[derive(Clone)]
pub struct CachePolicy {
    cache: Option<Arc<dyn Cache>>,
    ttl: Duration,
}

impl CachePolicy {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            cache: Some(cache),
            ttl,
        }
    }

    /// A policy that never caches.
    pub fn disabled() -> Self {
        Self {
            cache: None,
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Cache key of an order row.
    pub fn order_key(id: OrderId) -> String {
        format!("{id}_ORDER")
    }

    /// Cache key of an inventory row.
    pub fn inventory_key(key: StockKey) -> String {
        format!("{}_{}_INVENTORY", key.product_id, key.warehouse_id)
    }

    pub async fn load<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let cache = self.cache.as_ref()?;
        match cache.get_json(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed, falling back to store");
                None
            }
        }
    }

    pub async fn store<T>(&self, key: &str, value: &T)
    where
        T: Serialize + Sync,
    {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(e) = cache.set_json(key, value, self.ttl).await {
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }

    pub async fn evict(&self, key: &str) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(e) = cache.delete(key).await {
            tracing::warn!(key, error = %e, "cache eviction failed");
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePolicy")
            .field("enabled", &self.cache.is_some())
            .field("ttl", &self.ttl)
            .finish()
    }
}
