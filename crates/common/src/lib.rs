//! Shared value types used across the checkout and fulfillment crates.

pub mod cart;
pub mod money;
pub mod types;

pub use cart::CartLine;
pub use money::Money;
pub use types::{CatalogId, OrderId, UserId};
