//! Checkout service: validate a cart, then open a payment session.

use common::{CartLine, UserId};

use crate::catalog::CatalogGateway;
use crate::error::{CheckoutError, Result};
use crate::pricing::PricingValidator;
use crate::provider::PaymentProvider;
use crate::session::{CheckoutSession, CheckoutSessionBuilder};

/// Service for starting checkouts.
///
/// Wraps the pricing validator and the session builder so that a session is
/// only ever requested for a cart that priced cleanly.
pub struct CheckoutService<C: CatalogGateway, P: PaymentProvider> {
    validator: PricingValidator<C>,
    builder: CheckoutSessionBuilder<P>,
}

impl<C: CatalogGateway, P: PaymentProvider> CheckoutService<C, P> {
    pub fn new(validator: PricingValidator<C>, builder: CheckoutSessionBuilder<P>) -> Self {
        Self { validator, builder }
    }

    pub fn validator(&self) -> &PricingValidator<C> {
        &self.validator
    }

    pub fn builder(&self) -> &CheckoutSessionBuilder<P> {
        &self.builder
    }

    /// Prices `lines` and creates a payment session for them.
    #[tracing::instrument(skip(self, lines, customer_email), fields(line_count = lines.len()))]
    pub async fn start_checkout(
        &self,
        user_id: UserId,
        customer_email: Option<String>,
        lines: &[CartLine],
    ) -> Result<CheckoutSession> {
        let cart = match self.validator.validate(lines).await {
            Ok(cart) => cart,
            Err(e) => {
                if let CheckoutError::Validation(ref v) = e {
                    metrics::counter!("checkout_validation_failures_total", "code" => v.code())
                        .increment(1);
                    tracing::info!(code = v.code(), field = %v.field(), "cart rejected");
                }
                return Err(e);
            }
        };

        let session = self.builder.create(&cart, user_id, customer_email).await?;
        metrics::counter!("checkout_sessions_created_total").increment(1);
        Ok(session)
    }
}
