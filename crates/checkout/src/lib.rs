//! Checkout layer.
//!
//! This crate turns a user's cart into a payment session:
//! - `CatalogGateway` reads prices and stock from the product system
//! - `PricingValidator` prices a cart and enforces the checkout limits
//! - `CheckoutSessionBuilder` opens a hosted payment session for a `ValidatedCart`
//! - `metadata` encodes the cart into the session so fulfillment can rebuild it

pub mod catalog;
pub mod error;
pub mod metadata;
pub mod pricing;
pub mod provider;
pub mod service;
pub mod session;

pub use catalog::{CatalogError, CatalogGateway, CatalogProduct, InMemoryCatalog};
pub use error::{CheckoutError, Result, ValidationError};
pub use metadata::{CartMetadata, MetadataError};
pub use pricing::{CheckoutLimits, PricedLine, PricingValidator, ValidatedCart};
pub use provider::{
    InMemoryPaymentProvider, PaymentProvider, ProviderError, ProviderSession, SessionLine,
    SessionLineItem, SessionRequest,
};
pub use service::CheckoutService;
pub use session::{CheckoutSession, CheckoutSessionBuilder, CheckoutSettings};
