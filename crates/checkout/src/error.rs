//! Checkout error types.

use common::{CatalogId, Money};
use thiserror::Error;

/// A cart the user has to correct before paying.
///
/// Each variant knows which request field it refers to so the HTTP layer
/// can report field-level messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The product does not exist in the catalog.
    #[error("Product {catalog_id} not found")]
    InvalidProduct { index: usize, catalog_id: CatalogId },

    /// The catalog price is stale or unset.
    #[error("Product {catalog_id} has no purchasable price ({price})")]
    InvalidPrice {
        index: usize,
        catalog_id: CatalogId,
        price: Money,
    },

    /// Not enough stock to cover the requested quantity.
    #[error("Insufficient stock for {catalog_id}: requested {requested}, available {available}")]
    InsufficientStock {
        index: usize,
        catalog_id: CatalogId,
        requested: u32,
        available: u32,
    },

    /// Quantity must be greater than zero.
    #[error("Invalid quantity {quantity} for {catalog_id}")]
    InvalidQuantity {
        index: usize,
        catalog_id: CatalogId,
        quantity: u32,
    },

    /// Quantity exceeds the per-line limit.
    #[error("Maximum quantity allowed is {max} for {catalog_id}")]
    QuantityTooLarge {
        index: usize,
        catalog_id: CatalogId,
        quantity: u32,
        max: u32,
    },

    /// The cart has too many distinct lines.
    #[error("Cart cannot contain more than {max} lines (got {count})")]
    TooManyLines { count: usize, max: usize },

    /// The cart total is below the minimum charge.
    #[error("Minimum charge is {minimum}, cart total is {total}")]
    BelowMinimumCharge { total: Money, minimum: Money },

    /// The cart total exceeds the allowed maximum.
    #[error("Cart total {total} exceeds the maximum of {maximum}")]
    AboveMaximumTotal { total: Money, maximum: Money },
}

impl ValidationError {
    /// The request field the error refers to, e.g. `items[0].quantity`.
    pub fn field(&self) -> String {
        match self {
            ValidationError::InvalidProduct { index, .. } => format!("items[{index}].catalog_id"),
            ValidationError::InvalidPrice { index, .. } => format!("items[{index}].catalog_id"),
            ValidationError::InsufficientStock { index, .. }
            | ValidationError::InvalidQuantity { index, .. }
            | ValidationError::QuantityTooLarge { index, .. } => {
                format!("items[{index}].quantity")
            }
            ValidationError::TooManyLines { .. } => "items".to_string(),
            ValidationError::BelowMinimumCharge { .. }
            | ValidationError::AboveMaximumTotal { .. } => "total".to_string(),
        }
    }

    /// A stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidProduct { .. } => "invalid_product",
            ValidationError::InvalidPrice { .. } => "invalid_price",
            ValidationError::InsufficientStock { .. } => "insufficient_stock",
            ValidationError::InvalidQuantity { .. } => "invalid_quantity",
            ValidationError::QuantityTooLarge { .. } => "quantity_too_large",
            ValidationError::TooManyLines { .. } => "too_many_lines",
            ValidationError::BelowMinimumCharge { .. } => "below_minimum_charge",
            ValidationError::AboveMaximumTotal { .. } => "above_maximum_total",
        }
    }
}

/// Errors that can occur while preparing a checkout session.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The cart failed validation.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// There is nothing to check out.
    #[error("Cart is empty")]
    EmptyCart,

    /// The catalog could not be reached in time.
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// The payment provider failed to create the session.
    #[error("Payment provider error: {0}")]
    PaymentProvider(String),
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_points_at_offending_line() {
        let err = ValidationError::InsufficientStock {
            index: 3,
            catalog_id: CatalogId::new("P1"),
            requested: 5,
            available: 2,
        };
        assert_eq!(err.field(), "items[3].quantity");
        assert_eq!(err.code(), "insufficient_stock");
    }

    #[test]
    fn totals_are_reported_against_total_field() {
        let err = ValidationError::BelowMinimumCharge {
            total: Money::from_minor(100),
            minimum: Money::from_minor(2500),
        };
        assert_eq!(err.field(), "total");
        assert_eq!(err.to_string(), "Minimum charge is 25.00, cart total is 1.00");
    }
}
