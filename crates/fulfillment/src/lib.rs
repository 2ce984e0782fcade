//! Order fulfillment from payment provider webhooks.
//!
//! A completed-payment notification is verified, claimed for exclusive
//! processing, reconstructed from the session's metadata and the provider's
//! charged line items, and committed as one order in a single transaction.
//! Inventory decrements and the confirmation email follow the commit and
//! can only produce warnings.

pub mod dedup;
pub mod effects;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod state;
pub mod webhook;

pub use dedup::{
    ClaimOutcome, ClaimToken, DedupError, DedupPolicy, EventDeduplicator, InMemoryDeduplicator,
    PostgresDeduplicator,
};
pub use effects::{EffectPolicy, InventoryAdjustment, PostCommitEffect};
pub use error::{FulfillmentError, PartialFulfillmentWarning, Result};
pub use orchestrator::{
    FulfillmentOrchestrator, FulfillmentOutcome, FulfillmentReport, FulfillmentRun,
    FulfillmentSettings,
};
pub use services::{
    InMemoryNotifier, LogNotifier, Notifier, NotifyError, OrderSummary, SummaryLine,
};
pub use state::{FailureReason, FulfillmentState};
pub use webhook::{PaymentEvent, SIGNATURE_HEADER, WebhookError, WebhookVerifier, signature_header};
