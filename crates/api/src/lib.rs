//! HTTP API server for checkout and payment fulfillment.
//!
//! Exposes cart editing, checkout session creation and the payment webhook,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use checkout::{
    CheckoutService, CheckoutSessionBuilder, InMemoryCatalog, InMemoryPaymentProvider,
    PricingValidator,
};
use fulfillment::{EventDeduplicator, FulfillmentOrchestrator, LogNotifier, WebhookVerifier};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, D>(state: Arc<AppState<S, D>>, metrics_handle: PrometheusHandle) -> Router
where
    S: OrderStore + 'static,
    D: EventDeduplicator + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S, D>))
        .route(
            "/carts/{user_id}",
            get(routes::carts::get::<S, D>).put(routes::carts::put::<S, D>),
        )
        .route("/checkout", post(routes::checkout::create::<S, D>))
        .route("/webhooks/payment", post(routes::webhooks::payment::<S, D>))
        .route("/orders/{order_number}", get(routes::orders::get::<S, D>))
        .route(
            "/orders/{order_number}/status",
            patch(routes::orders::update_status::<S, D>),
        )
        .route(
            "/users/{user_id}/orders",
            get(routes::orders::list_for_user::<S, D>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state around a store, a deduplicator and a
/// catalog, with an in-process payment provider and a logging notifier.
pub fn create_default_state<S, D>(
    config: &Config,
    store: S,
    dedup: D,
    catalog: InMemoryCatalog,
) -> Arc<AppState<S, D>>
where
    S: OrderStore + Clone + 'static,
    D: EventDeduplicator + 'static,
{
    let provider = InMemoryPaymentProvider::new();

    let validator =
        PricingValidator::new(catalog.clone()).with_lookup_timeout(config.upstream_timeout);
    let builder = CheckoutSessionBuilder::new(provider.clone(), config.checkout_settings())
        .with_timeout(config.upstream_timeout);
    let checkout = CheckoutService::new(validator, builder);

    let verifier =
        WebhookVerifier::new(config.webhook_secret.clone()).with_tolerance(config.webhook_tolerance);
    let orchestrator = FulfillmentOrchestrator::new(
        verifier,
        store.clone(),
        catalog.clone(),
        provider.clone(),
        LogNotifier,
        dedup,
    )
    .with_settings(config.fulfillment_settings());

    Arc::new(AppState {
        store,
        checkout,
        orchestrator,
        catalog,
        provider,
    })
}
