//! Cart pricing and validation against the catalog.

use std::collections::HashMap;
use std::time::Duration;

use common::{CartLine, CatalogId, Money};
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogGateway, CatalogProduct};
use crate::error::{CheckoutError, Result, ValidationError};

/// A cart line priced against the current catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub catalog_id: CatalogId,
    pub quantity: u32,
    pub unit_price: Money,
    pub display_name: String,
}

impl PricedLine {
    /// Creates a priced line.
    pub fn new(
        catalog_id: impl Into<CatalogId>,
        quantity: u32,
        unit_price: Money,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            quantity,
            unit_price,
            display_name: display_name.into(),
        }
    }

    /// Unit price times quantity. Saturates instead of wrapping.
    pub fn total_price(&self) -> Money {
        self.unit_price
            .checked_mul(self.quantity)
            .unwrap_or(Money::from_minor(i64::MAX))
    }
}

/// Business limits applied to every cart at checkout.
///
/// The default `minimum_total` is 2500 minor units, so a small cart such as
/// two units of a product priced at 100 is rejected with
/// [`ValidationError::BelowMinimumCharge`]. Tests and catalogs with cheaper
/// items lower it with [`PricingValidator::with_limits`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLimits {
    pub max_lines: usize,
    pub max_quantity_per_line: u32,
    pub minimum_total: Money,
    pub maximum_total: Money,
}

impl Default for CheckoutLimits {
    fn default() -> Self {
        Self {
            max_lines: 50,
            max_quantity_per_line: 100,
            minimum_total: Money::from_minor(2_500),
            maximum_total: Money::from_minor(10_000_000),
        }
    }
}

/// A cart that passed validation.
///
/// Only [`PricingValidator::validate`] can build one, so anything holding a
/// `ValidatedCart` knows the catalog was consulted first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCart {
    lines: Vec<PricedLine>,
    total: Money,
}

impl ValidatedCart {
    /// Priced lines in the order the user submitted them.
    pub fn lines(&self) -> &[PricedLine] {
        &self.lines
    }

    /// The original `(catalog_id, quantity)` pairs.
    pub fn cart_lines(&self) -> Vec<CartLine> {
        self.lines
            .iter()
            .map(|l| CartLine::new(l.catalog_id.clone(), l.quantity))
            .collect()
    }

    /// Sum of all line totals.
    pub fn total(&self) -> Money {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Prices a cart against the catalog and enforces the checkout limits.
pub struct PricingValidator<C: CatalogGateway> {
    catalog: C,
    limits: CheckoutLimits,
    lookup_timeout: Duration,
}

impl<C: CatalogGateway> PricingValidator<C> {
    /// Creates a validator with default limits and a five second lookup timeout.
    pub fn new(catalog: C) -> Self {
        Self {
            catalog,
            limits: CheckoutLimits::default(),
            lookup_timeout: Duration::from_secs(5),
        }
    }

    /// Overrides the checkout limits.
    pub fn with_limits(mut self, limits: CheckoutLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Overrides the per-read catalog timeout.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn limits(&self) -> &CheckoutLimits {
        &self.limits
    }

    /// Validates every line of the cart. The whole cart fails on the first
    /// invalid line.
    #[tracing::instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn validate(&self, lines: &[CartLine]) -> Result<ValidatedCart> {
        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        if lines.len() > self.limits.max_lines {
            return Err(ValidationError::TooManyLines {
                count: lines.len(),
                max: self.limits.max_lines,
            }
            .into());
        }

        let mut priced = Vec::with_capacity(lines.len());
        // Stock is checked against the cumulative quantity per product so a
        // product split over several lines cannot oversell.
        let mut requested: HashMap<&CatalogId, u32> = HashMap::new();
        let mut total = Money::zero();

        for (index, line) in lines.iter().enumerate() {
            self.check_quantity(index, line)?;

            let product = self.lookup(index, &line.catalog_id).await?;
            if !product.price.is_positive() {
                return Err(ValidationError::InvalidPrice {
                    index,
                    catalog_id: line.catalog_id.clone(),
                    price: product.price,
                }
                .into());
            }

            let wanted = requested.entry(&line.catalog_id).or_insert(0);
            *wanted = wanted.saturating_add(line.quantity);
            if product.stock < *wanted {
                return Err(ValidationError::InsufficientStock {
                    index,
                    catalog_id: line.catalog_id.clone(),
                    requested: *wanted,
                    available: product.stock,
                }
                .into());
            }

            let line_total = product
                .price
                .checked_mul(line.quantity)
                .and_then(|t| t.checked_add(total));
            total = match line_total {
                Some(t) => t,
                None => {
                    return Err(ValidationError::AboveMaximumTotal {
                        total: Money::from_minor(i64::MAX),
                        maximum: self.limits.maximum_total,
                    }
                    .into());
                }
            };

            priced.push(PricedLine::new(
                line.catalog_id.clone(),
                line.quantity,
                product.price,
                product.name,
            ));
        }

        if total < self.limits.minimum_total {
            return Err(ValidationError::BelowMinimumCharge {
                total,
                minimum: self.limits.minimum_total,
            }
            .into());
        }
        if total > self.limits.maximum_total {
            return Err(ValidationError::AboveMaximumTotal {
                total,
                maximum: self.limits.maximum_total,
            }
            .into());
        }

        Ok(ValidatedCart {
            lines: priced,
            total,
        })
    }

    fn check_quantity(&self, index: usize, line: &CartLine) -> Result<()> {
        if line.quantity == 0 {
            return Err(ValidationError::InvalidQuantity {
                index,
                catalog_id: line.catalog_id.clone(),
                quantity: line.quantity,
            }
            .into());
        }
        if line.quantity > self.limits.max_quantity_per_line {
            return Err(ValidationError::QuantityTooLarge {
                index,
                catalog_id: line.catalog_id.clone(),
                quantity: line.quantity,
                max: self.limits.max_quantity_per_line,
            }
            .into());
        }
        Ok(())
    }

    async fn lookup(&self, index: usize, catalog_id: &CatalogId) -> Result<CatalogProduct> {
        let invalid = || ValidationError::InvalidProduct {
            index,
            catalog_id: catalog_id.clone(),
        };
        if catalog_id.is_blank() {
            return Err(invalid().into());
        }

        match tokio::time::timeout(self.lookup_timeout, self.catalog.read(catalog_id)).await {
            Ok(Ok(Some(product))) => Ok(product),
            Ok(Ok(None)) => Err(invalid().into()),
            Ok(Err(e)) => Err(CheckoutError::CatalogUnavailable(e.to_string())),
            Err(_) => Err(CheckoutError::CatalogUnavailable(format!(
                "read of {catalog_id} timed out after {:?}",
                self.lookup_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::with_products([
            CatalogProduct::new("P1", "Widget", Money::from_minor(1_000), 5),
            CatalogProduct::new("P2", "Gadget", Money::from_minor(3_500), 1),
            CatalogProduct::new("FREE", "Sticker", Money::zero(), 100),
        ])
    }

    fn validation_error(result: Result<ValidatedCart>) -> ValidationError {
        match result {
            Err(CheckoutError::Validation(e)) => e,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn prices_lines_in_submission_order() {
        let validator = PricingValidator::new(catalog());
        let cart = validator
            .validate(&[CartLine::new("P2", 1), CartLine::new("P1", 2)])
            .await
            .unwrap();

        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.lines()[0].display_name, "Gadget");
        assert_eq!(cart.lines()[1].total_price(), Money::from_minor(2_000));
        assert_eq!(cart.total(), Money::from_minor(5_500));
        assert_eq!(
            cart.cart_lines(),
            vec![CartLine::new("P2", 1), CartLine::new("P1", 2)]
        );
    }

    #[tokio::test]
    async fn unknown_product_fails_whole_cart() {
        let validator = PricingValidator::new(catalog());
        let err = validation_error(
            validator
                .validate(&[CartLine::new("P1", 3), CartLine::new("NOPE", 1)])
                .await,
        );
        assert_eq!(err.code(), "invalid_product");
        assert_eq!(err.field(), "items[1].catalog_id");
    }

    #[tokio::test]
    async fn blank_catalog_id_is_invalid_product() {
        let validator = PricingValidator::new(catalog());
        let err = validation_error(validator.validate(&[CartLine::new("  ", 1)]).await);
        assert!(matches!(err, ValidationError::InvalidProduct { index: 0, .. }));
    }

    #[tokio::test]
    async fn zero_price_is_rejected() {
        let validator = PricingValidator::new(catalog());
        let err = validation_error(
            validator
                .validate(&[CartLine::new("P2", 1), CartLine::new("FREE", 1)])
                .await,
        );
        assert_eq!(err.code(), "invalid_price");
    }

    #[tokio::test]
    async fn stock_is_checked_strictly() {
        let validator = PricingValidator::new(catalog());
        let err = validation_error(validator.validate(&[CartLine::new("P1", 6)]).await);
        assert_eq!(
            err,
            ValidationError::InsufficientStock {
                index: 0,
                catalog_id: CatalogId::new("P1"),
                requested: 6,
                available: 5,
            }
        );
    }

    #[tokio::test]
    async fn stock_is_checked_across_split_lines() {
        let validator = PricingValidator::new(catalog());
        let err = validation_error(
            validator
                .validate(&[CartLine::new("P1", 3), CartLine::new("P1", 3)])
                .await,
        );
        assert!(matches!(
            err,
            ValidationError::InsufficientStock {
                index: 1,
                requested: 6,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn quantity_limits() {
        let validator = PricingValidator::new(catalog());

        let err = validation_error(validator.validate(&[CartLine::new("P1", 0)]).await);
        assert_eq!(err.code(), "invalid_quantity");
        assert_eq!(err.field(), "items[0].quantity");

        let err = validation_error(validator.validate(&[CartLine::new("P1", 101)]).await);
        assert_eq!(err.code(), "quantity_too_large");
    }

    #[tokio::test]
    async fn too_many_lines() {
        let validator = PricingValidator::new(catalog()).with_limits(CheckoutLimits {
            max_lines: 1,
            ..CheckoutLimits::default()
        });
        let err = validation_error(
            validator
                .validate(&[CartLine::new("P1", 3), CartLine::new("P2", 1)])
                .await,
        );
        assert_eq!(err, ValidationError::TooManyLines { count: 2, max: 1 });
    }

    #[tokio::test]
    async fn total_bounds() {
        let validator = PricingValidator::new(catalog());
        let err = validation_error(validator.validate(&[CartLine::new("P1", 2)]).await);
        assert_eq!(err.code(), "below_minimum_charge");

        let validator = PricingValidator::new(catalog()).with_limits(CheckoutLimits {
            maximum_total: Money::from_minor(4_000),
            ..CheckoutLimits::default()
        });
        let err = validation_error(validator.validate(&[CartLine::new("P1", 5)]).await);
        assert_eq!(err.code(), "above_maximum_total");
    }

    #[tokio::test]
    async fn empty_cart() {
        let validator = PricingValidator::new(catalog());
        assert!(matches!(
            validator.validate(&[]).await,
            Err(CheckoutError::EmptyCart)
        ));
    }

    #[tokio::test]
    async fn catalog_failure_is_unavailable() {
        let catalog = catalog();
        catalog.set_fail_on_read(true);
        let validator = PricingValidator::new(catalog);
        assert!(matches!(
            validator.validate(&[CartLine::new("P1", 3)]).await,
            Err(CheckoutError::CatalogUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn default_minimum_rejects_small_cart() {
        let catalog = InMemoryCatalog::with_products([CatalogProduct::new(
            "P1",
            "Widget",
            Money::from_minor(100),
            10,
        )]);

        let err = validation_error(
            PricingValidator::new(catalog.clone())
                .validate(&[CartLine::new("P1", 2)])
                .await,
        );
        assert!(matches!(
            err,
            ValidationError::BelowMinimumCharge { total, .. } if total == Money::from_minor(200)
        ));

        let cart = PricingValidator::new(catalog)
            .with_limits(CheckoutLimits {
                minimum_total: Money::from_minor(1),
                ..CheckoutLimits::default()
            })
            .validate(&[CartLine::new("P1", 2)])
            .await
            .unwrap();
        assert_eq!(cart.total(), Money::from_minor(200));
    }
}
