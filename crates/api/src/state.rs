//! Shared application state.

use checkout::{CheckoutService, InMemoryCatalog, InMemoryPaymentProvider};
use fulfillment::{EventDeduplicator, FulfillmentOrchestrator, LogNotifier};
use order_store::OrderStore;

/// The orchestrator as wired by the server.
pub type Orchestrator<S, D> =
    FulfillmentOrchestrator<S, InMemoryCatalog, InMemoryPaymentProvider, LogNotifier, D>;

/// Shared application state accessible from all handlers.
///
/// The store and the deduplicator are chosen at startup (in-memory or
/// Postgres); the catalog and provider are in-process services. Order
/// confirmations go to the log.
pub struct AppState<S: OrderStore, D: EventDeduplicator> {
    pub store: S,
    pub checkout: CheckoutService<InMemoryCatalog, InMemoryPaymentProvider>,
    pub orchestrator: Orchestrator<S, D>,
    pub catalog: InMemoryCatalog,
    pub provider: InMemoryPaymentProvider,
}
