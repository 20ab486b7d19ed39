//! Reconciler entry point.

use std::sync::Arc;

use domain::CachePolicy;
use metrics_exporter_prometheus::PrometheusBuilder;
use reconciler::{Config, LogFormat, Reconciler, ReconcilerError};
use saga::OrderCancellation;
use sqlx::postgres::PgPoolOptions;
use store::{Cache, InMemoryCache, PostgresStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, finishing current pass");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, finishing current pass");
        }
    }
}

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Picks the cache whose entries the reconciler evicts after releasing stock.
async fn build_cache(config: &Config) -> Arc<dyn Cache> {
    #[cfg(feature = "redis")]
    if let Some(url) = &config.redis_url {
        match store::RedisCache::connect(url).await {
            Ok(cache) => {
                tracing::info!("using redis cache");
                return Arc::new(cache);
            }
            Err(e) => {
                tracing::warn!(error = %e, "redis unavailable, using in-process cache");
            }
        }
    }

    #[cfg(not(feature = "redis"))]
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is disabled");
    }

    Arc::new(InMemoryCache::new())
}

#[tokio::main]
async fn main() -> Result<(), ReconcilerError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(config.log_format);

    // 2. Serve Prometheus metrics
    PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()
        .map_err(|e| ReconcilerError::Metrics(e.to_string()))?;

    // 3. Connect and migrate
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let store = PostgresStore::new(pool);
    store.run_migrations().await?;

    // 4. Build the saga
    let cache = CachePolicy::new(build_cache(&config).await, config.cache_ttl);
    let reconciler = Reconciler::new(
        OrderCancellation::with_cache(store, cache),
        config.reconcile_interval,
    );

    tracing::info!(
        interval_secs = config.reconcile_interval.as_secs(),
        metrics_addr = %config.metrics_addr,
        "starting reconciler"
    );
    reconciler.run(shutdown_signal()).await;

    tracing::info!("reconciler shut down gracefully");
    Ok(())
}
