//! Reconciler error types.

use saga::CompensationError;
use store::{CacheError, StoreError};
use thiserror::Error;

/// Errors that stop the reconciler from starting or finishing a pass.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// The connection pool could not be created.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The schema could not be migrated.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Listing or replaying compensations failed.
    #[error("Compensation error: {0}")]
    Compensation(#[from] CompensationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The Prometheus exporter could not be installed.
    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// Convenience type alias for reconciler results.
pub type Result<T> = std::result::Result<T, ReconcilerError>;
