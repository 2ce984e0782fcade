//! Fulfillment error types.

use order_store::StoreError;
use serde::Serialize;
use thiserror::Error;

use crate::dedup::DedupError;
use crate::state::FailureReason;
use crate::webhook::WebhookError;

/// Errors that can stop a fulfillment run before its order is committed.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The notification was not authentic or could not be parsed.
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    /// The cart could not be rebuilt from the payment session.
    #[error("Metadata corrupt: {0}")]
    MetadataCorrupt(String),

    /// The order store rejected or failed the commit.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// The payment provider could not be queried.
    #[error("Payment provider error: {0}")]
    Provider(String),

    /// The deduplication backend failed.
    #[error("Deduplication error: {0}")]
    Dedup(#[from] DedupError),
}

impl FulfillmentError {
    /// True when a redelivery of the same notification may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FulfillmentError::Webhook(_) | FulfillmentError::MetadataCorrupt(_) => false,
            FulfillmentError::Storage(e) => e.is_retryable(),
            FulfillmentError::Provider(_) | FulfillmentError::Dedup(_) => true,
        }
    }

    /// The failure reason recorded in the run's final state.
    pub fn reason(&self) -> FailureReason {
        match self {
            FulfillmentError::Webhook(_) => FailureReason::Unverified,
            FulfillmentError::MetadataCorrupt(_) => FailureReason::MetadataCorrupt,
            FulfillmentError::Storage(_) => FailureReason::StorageError,
            FulfillmentError::Provider(_) => FailureReason::ProviderError,
            FulfillmentError::Dedup(_) => FailureReason::DedupError,
        }
    }
}

/// A post-commit side effect that did not succeed.
///
/// The order stays committed; the warning is reported, logged and counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialFulfillmentWarning {
    pub effect: String,
    pub attempts: u32,
    pub reason: String,
}

impl std::fmt::Display for PartialFulfillmentWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.effect, self.attempts, self.reason
        )
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
