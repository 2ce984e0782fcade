//! Post-commit side effects.
//!
//! Effects run only after the order transaction has committed. Each one is
//! attempted independently with a timeout and bounded retries; whatever still
//! fails becomes a [`PartialFulfillmentWarning`] and never touches the order.

use std::time::Duration;

use checkout::{CatalogError, CatalogGateway};
use common::CatalogId;
use futures_util::future::join_all;
use tracing::Instrument;

use crate::error::PartialFulfillmentWarning;
use crate::services::notifier::{Notifier, OrderSummary};

/// A stock change owed to the catalog. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryAdjustment {
    pub catalog_id: CatalogId,
    pub delta_quantity: i64,
}

impl InventoryAdjustment {
    pub fn decrement(catalog_id: CatalogId, quantity: u32) -> Self {
        Self {
            catalog_id,
            delta_quantity: -i64::from(quantity),
        }
    }

    /// Units to remove from stock.
    pub fn quantity(&self) -> u32 {
        u32::try_from(self.delta_quantity.unsigned_abs()).unwrap_or(u32::MAX)
    }
}

/// Work scheduled after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostCommitEffect {
    DecrementInventory(InventoryAdjustment),
    SendConfirmation(Box<OrderSummary>),
}

impl PostCommitEffect {
    /// Metric label for the effect kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PostCommitEffect::DecrementInventory(_) => "decrement_inventory",
            PostCommitEffect::SendConfirmation(_) => "send_confirmation",
        }
    }

    /// Kind plus target, for logs and warnings.
    pub fn name(&self) -> String {
        match self {
            PostCommitEffect::DecrementInventory(adj) => {
                format!("decrement_inventory:{}", adj.catalog_id)
            }
            PostCommitEffect::SendConfirmation(_) => "send_confirmation".to_string(),
        }
    }
}

/// Timeout and retry settings for each effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff` before the next try.
    pub backoff: Duration,
}

impl Default for EffectPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

struct EffectFailure {
    reason: String,
    retryable: bool,
}

/// Runs every effect concurrently and returns the ones that gave up.
pub async fn dispatch<C, N>(
    catalog: &C,
    notifier: &N,
    effects: Vec<PostCommitEffect>,
    policy: &EffectPolicy,
) -> Vec<PartialFulfillmentWarning>
where
    C: CatalogGateway,
    N: Notifier,
{
    let runs = effects.into_iter().map(|effect| {
        let span = tracing::info_span!("post_commit_effect", effect = %effect.name());
        async move { run_with_retry(catalog, notifier, &effect, policy).await }.instrument(span)
    });

    join_all(runs).await.into_iter().flatten().collect()
}

async fn run_with_retry<C, N>(
    catalog: &C,
    notifier: &N,
    effect: &PostCommitEffect,
    policy: &EffectPolicy,
) -> Option<PartialFulfillmentWarning>
where
    C: CatalogGateway,
    N: Notifier,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let failure = match tokio::time::timeout(policy.timeout, run_once(catalog, notifier, effect))
            .await
        {
            Ok(Ok(())) => {
                tracing::debug!(attempt, "effect succeeded");
                return None;
            }
            Ok(Err(failure)) => failure,
            Err(_) => EffectFailure {
                reason: format!("timed out after {:?}", policy.timeout),
                retryable: true,
            },
        };

        if !failure.retryable || attempt >= max_attempts {
            tracing::warn!(attempt, reason = %failure.reason, "effect gave up");
            metrics::counter!(
                "fulfillment_side_effect_failures_total",
                "effect" => effect.kind()
            )
            .increment(1);
            return Some(PartialFulfillmentWarning {
                effect: effect.name(),
                attempts: attempt,
                reason: failure.reason,
            });
        }

        tracing::debug!(attempt, reason = %failure.reason, "effect failed, retrying");
        tokio::time::sleep(policy.backoff * attempt).await;
    }
}

async fn run_once<C, N>(
    catalog: &C,
    notifier: &N,
    effect: &PostCommitEffect,
) -> Result<(), EffectFailure>
where
    C: CatalogGateway,
    N: Notifier,
{
    match effect {
        PostCommitEffect::DecrementInventory(adj) => catalog
            .decrement(&adj.catalog_id, adj.quantity())
            .await
            .map_err(|e| EffectFailure {
                retryable: matches!(e, CatalogError::Unavailable(_)),
                reason: e.to_string(),
            }),
        PostCommitEffect::SendConfirmation(summary) => {
            notifier.send(summary).await.map_err(|e| EffectFailure {
                reason: e.to_string(),
                retryable: true,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifier::InMemoryNotifier;
    use checkout::{CatalogProduct, InMemoryCatalog};
    use common::{Money, UserId};

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::with_products([
            CatalogProduct::new("P1", "Widget", Money::from_minor(1_000), 10),
            CatalogProduct::new("P2", "Gadget", Money::from_minor(500), 1),
        ])
    }

    fn summary() -> OrderSummary {
        OrderSummary {
            order_number: "ORD-x".to_string(),
            user_id: UserId::new(),
            customer_email: "a@b.test".to_string(),
            customer_name: None,
            currency: "egp".to_string(),
            total: Money::from_minor(3_000),
            lines: vec![],
        }
    }

    fn fast_policy() -> EffectPolicy {
        EffectPolicy {
            timeout: Duration::from_millis(200),
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn adjustment_is_negative_delta() {
        let adj = InventoryAdjustment::decrement(CatalogId::new("P1"), 3);
        assert_eq!(adj.delta_quantity, -3);
        assert_eq!(adj.quantity(), 3);
    }

    #[tokio::test]
    async fn all_effects_succeed() {
        let catalog = catalog();
        let notifier = InMemoryNotifier::new();
        let effects = vec![
            PostCommitEffect::DecrementInventory(InventoryAdjustment::decrement(
                CatalogId::new("P1"),
                3,
            )),
            PostCommitEffect::SendConfirmation(Box::new(summary())),
        ];

        let warnings = dispatch(&catalog, &notifier, effects, &fast_policy()).await;

        assert!(warnings.is_empty());
        assert_eq!(catalog.stock(&CatalogId::new("P1")).await, Some(7));
        assert_eq!(notifier.sent_count().await, 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let catalog = catalog();
        let notifier = InMemoryNotifier::new();
        notifier.fail_next(2);

        let warnings = dispatch(
            &catalog,
            &notifier,
            vec![PostCommitEffect::SendConfirmation(Box::new(summary()))],
            &fast_policy(),
        )
        .await;

        assert!(warnings.is_empty());
        assert_eq!(notifier.sent_count().await, 1);
    }

    #[tokio::test]
    async fn persistent_failure_becomes_warning() {
        let catalog = catalog();
        catalog.set_fail_on_decrement(true);
        let notifier = InMemoryNotifier::new();

        let warnings = dispatch(
            &catalog,
            &notifier,
            vec![
                PostCommitEffect::DecrementInventory(InventoryAdjustment::decrement(
                    CatalogId::new("P1"),
                    1,
                )),
                PostCommitEffect::SendConfirmation(Box::new(summary())),
            ],
            &fast_policy(),
        )
        .await;

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].effect, "decrement_inventory:P1");
        assert_eq!(warnings[0].attempts, 3);
        assert_eq!(catalog.decrement_calls(), 3);
        assert_eq!(notifier.sent_count().await, 1);
    }

    #[tokio::test]
    async fn rejected_decrement_is_not_retried() {
        let catalog = catalog();
        let notifier = InMemoryNotifier::new();

        let warnings = dispatch(
            &catalog,
            &notifier,
            vec![PostCommitEffect::DecrementInventory(
                InventoryAdjustment::decrement(CatalogId::new("P2"), 5),
            )],
            &fast_policy(),
        )
        .await;

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].attempts, 1);
        assert_eq!(catalog.decrement_calls(), 1);
    }
}
