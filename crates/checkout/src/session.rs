//! Builds payment provider sessions from validated carts.

use std::collections::BTreeMap;
use std::time::Duration;

use common::UserId;
use serde::Serialize;

use crate::error::{CheckoutError, Result};
use crate::metadata;
use crate::pricing::ValidatedCart;
use crate::provider::{PaymentProvider, SessionLine, SessionRequest};

/// Placeholder the provider substitutes with the real session id on redirect.
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// Static settings for every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSettings {
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            currency: "egp".to_string(),
            success_url: "http://localhost:3000/checkout/success".to_string(),
            cancel_url: "http://localhost:3000/checkout/cancel".to_string(),
        }
    }
}

/// A created payment session, ready for redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub redirect_url: String,
    #[serde(skip)]
    pub metadata: BTreeMap<String, String>,
}

/// Turns a [`ValidatedCart`] into a provider session.
pub struct CheckoutSessionBuilder<P: PaymentProvider> {
    provider: P,
    settings: CheckoutSettings,
    timeout: Duration,
}

impl<P: PaymentProvider> CheckoutSessionBuilder<P> {
    pub fn new(provider: P, settings: CheckoutSettings) -> Self {
        Self {
            provider,
            settings,
            timeout: Duration::from_secs(10),
        }
    }

    /// Overrides the provider call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn settings(&self) -> &CheckoutSettings {
        &self.settings
    }

    /// Assembles the provider request without sending it.
    pub fn request_for(
        &self,
        cart: &ValidatedCart,
        user_id: UserId,
        customer_email: Option<String>,
    ) -> Result<SessionRequest> {
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let lines = cart
            .lines()
            .iter()
            .map(|l| SessionLine {
                name: l.display_name.clone(),
                unit_amount: l.unit_price,
                quantity: l.quantity,
            })
            .collect();

        Ok(SessionRequest {
            currency: self.settings.currency.clone(),
            lines,
            success_url: success_url(&self.settings.success_url),
            cancel_url: self.settings.cancel_url.clone(),
            customer_email,
            metadata: metadata::encode(user_id, &cart.cart_lines()),
        })
    }

    /// Creates the provider session for a validated cart.
    #[tracing::instrument(skip(self, cart, customer_email), fields(%user_id, total = %cart.total()))]
    pub async fn create(
        &self,
        cart: &ValidatedCart,
        user_id: UserId,
        customer_email: Option<String>,
    ) -> Result<CheckoutSession> {
        let request = self.request_for(cart, user_id, customer_email)?;
        let metadata = request.metadata.clone();

        let session = tokio::time::timeout(self.timeout, self.provider.create_session(request))
            .await
            .map_err(|_| {
                CheckoutError::PaymentProvider(format!(
                    "session creation timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| CheckoutError::PaymentProvider(e.to_string()))?;

        tracing::info!(session_id = %session.id, "payment session created");

        Ok(CheckoutSession {
            session_id: session.id,
            redirect_url: session.url,
            metadata,
        })
    }
}

fn success_url(base: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}session_id={SESSION_ID_PLACEHOLDER}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogProduct, InMemoryCatalog};
    use crate::pricing::PricingValidator;
    use crate::provider::InMemoryPaymentProvider;
    use common::{CartLine, Money};

    async fn validated() -> ValidatedCart {
        let catalog = InMemoryCatalog::with_products([
            CatalogProduct::new("P1", "Widget", Money::from_minor(1_000), 10),
            CatalogProduct::new("P2", "Gadget", Money::from_minor(2_500), 10),
        ]);
        PricingValidator::new(catalog)
            .validate(&[CartLine::new("P1", 2), CartLine::new("P2", 1)])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn request_carries_lines_urls_and_metadata() {
        let builder =
            CheckoutSessionBuilder::new(InMemoryPaymentProvider::new(), CheckoutSettings::default());
        let user_id = UserId::new();
        let request = builder
            .request_for(&validated().await, user_id, Some("a@b.test".to_string()))
            .unwrap();

        assert_eq!(request.lines.len(), 2);
        assert_eq!(request.lines[0].name, "Widget");
        assert_eq!(request.lines[0].unit_amount, Money::from_minor(1_000));
        assert_eq!(request.lines[0].quantity, 2);
        assert_eq!(
            request.success_url,
            "http://localhost:3000/checkout/success?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(request.customer_email.as_deref(), Some("a@b.test"));
        assert_eq!(
            request.metadata.get("user_id"),
            Some(&user_id.to_string())
        );
        assert_eq!(
            request.metadata.get("item_1_id").map(String::as_str),
            Some("P2")
        );
    }

    #[tokio::test]
    async fn create_returns_session_and_redirect() {
        let provider = InMemoryPaymentProvider::new();
        let builder = CheckoutSessionBuilder::new(provider.clone(), CheckoutSettings::default());

        let session = builder
            .create(&validated().await, UserId::new(), None)
            .await
            .unwrap();

        assert_eq!(session.session_id, "cs_test_0001");
        assert!(session.redirect_url.ends_with("cs_test_0001"));
        assert_eq!(provider.session_count().await, 1);
    }

    #[tokio::test]
    async fn provider_failure_surfaces_as_payment_provider_error() {
        let provider = InMemoryPaymentProvider::new();
        provider.set_fail_on_create(true);
        let builder = CheckoutSessionBuilder::new(provider, CheckoutSettings::default());

        let result = builder.create(&validated().await, UserId::new(), None).await;
        assert!(matches!(result, Err(CheckoutError::PaymentProvider(_))));
    }

    #[test]
    fn success_url_appends_to_existing_query() {
        assert_eq!(
            success_url("https://shop.test/done?lang=ar"),
            "https://shop.test/done?lang=ar&session_id={CHECKOUT_SESSION_ID}"
        );
    }
}
