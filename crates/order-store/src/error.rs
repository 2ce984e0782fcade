use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An order with this order number already exists.
    ///
    /// Raised by the unique constraint on `order_number`; for fulfillment
    /// this means the payment session was already materialized.
    #[error("Duplicate order: {order_number}")]
    DuplicateOrder { order_number: String },

    /// The order to create violates an invariant (no items, bad totals, ...).
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// A stored row could not be mapped back into a model type.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The store is unavailable or a write was interrupted.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No order has this order number.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// The requested status change is not allowed from the current status.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true if retrying the same write could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Database(_))
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
