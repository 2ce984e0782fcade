//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::AppState;
use api::config::{Config, LogFormat};
use checkout::{CatalogProduct, InMemoryCatalog};
use fulfillment::{EventDeduplicator, InMemoryDeduplicator, PostgresDeduplicator};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

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
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Loads the catalog from `CATALOG_FILE`, or starts empty.
async fn load_catalog(config: &Config) -> InMemoryCatalog {
    let Some(path) = &config.catalog_file else {
        tracing::warn!("CATALOG_FILE not set, starting with an empty catalog");
        return InMemoryCatalog::new();
    };

    let raw = tokio::fs::read_to_string(path)
        .await
        .expect("failed to read catalog file");
    let products: Vec<CatalogProduct> =
        serde_json::from_str(&raw).expect("catalog file is not a JSON product list");

    tracing::info!(%path, products = products.len(), "catalog loaded");
    InMemoryCatalog::with_products(products)
}

/// Periodically drops expired webhook claims so the claim set stays bounded.
fn spawn_claim_purge<D: EventDeduplicator + 'static>(dedup: D) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match dedup.purge_expired().await {
                Ok(n) if n > 0 => tracing::info!(purged = n, "expired webhook claims purged"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "claim purge failed"),
            }
        }
    });
}

async fn serve<S, D>(config: &Config, state: Arc<AppState<S, D>>, metrics_handle: PrometheusHandle)
where
    S: OrderStore + 'static,
    D: EventDeduplicator + 'static,
{
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    if config.uses_dev_secret() {
        tracing::warn!("WEBHOOK_SECRET not set, using the development secret");
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    api::routes::metrics::describe();

    // 3. Seed the catalog
    let catalog = load_catalog(&config).await;

    // 4. Pick storage and build application state
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to Postgres");

            let store = PostgresOrderStore::new(pool.clone());
            store.run_migrations().await.expect("migrations failed");

            let dedup = PostgresDeduplicator::new(pool, config.dedup_policy());
            spawn_claim_purge(dedup.clone());

            tracing::info!("using Postgres order store");
            let state = api::create_default_state(&config, store, dedup, catalog);
            serve(&config, state, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory");
            let store = InMemoryOrderStore::new();
            let dedup = InMemoryDeduplicator::new(config.dedup_policy());
            spawn_claim_purge(dedup.clone());
            let state = api::create_default_state(&config, store, dedup, catalog);
            serve(&config, state, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
