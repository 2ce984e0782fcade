//! Fulfillment orchestrator: turns a verified payment notification into
//! exactly one committed order, then dispatches post-commit effects.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use checkout::metadata::{self, CartMetadata};
use checkout::{CatalogGateway, PaymentProvider, PricedLine, SessionLineItem};
use common::{Money, OrderId, UserId};
use order_store::{NewOrder, NewOrderItem, OrderStore, StoreError};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::dedup::{ClaimOutcome, ClaimToken, EventDeduplicator};
use crate::effects::{self, EffectPolicy, InventoryAdjustment, PostCommitEffect};
use crate::error::{FulfillmentError, PartialFulfillmentWarning, Result};
use crate::services::notifier::{Notifier, OrderSummary, SummaryLine};
use crate::state::FulfillmentState;
use crate::webhook::{PAYMENT_INTENT_FAILED, PaymentEvent, WebhookVerifier};

/// Tunables for fulfillment runs.
#[derive(Debug, Clone)]
pub struct FulfillmentSettings {
    pub effect_policy: EffectPolicy,
    /// Bound on provider lookups and the storage commit.
    pub upstream_timeout: Duration,
    /// Used when the notification carries no currency.
    pub default_currency: String,
}

impl Default for FulfillmentSettings {
    fn default() -> Self {
        Self {
            effect_policy: EffectPolicy::default(),
            upstream_timeout: Duration::from_secs(10),
            default_currency: "egp".to_string(),
        }
    }
}

/// What a fulfilled order looks like once effects ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FulfillmentReport {
    pub order_id: OrderId,
    pub order_number: String,
    pub total: Money,
    pub warnings: Vec<PartialFulfillmentWarning>,
}

/// How a notification was acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// A new order was committed.
    Fulfilled(FulfillmentReport),
    /// The event id was already claimed or completed.
    AlreadyProcessed,
    /// The order for this session already exists.
    AlreadyFulfilled { order_number: String },
    /// A failed payment was logged; nothing to fulfill.
    PaymentFailed { session_id: String },
    /// The event type needs no action.
    Ignored { event_type: String },
}

impl FulfillmentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentOutcome::Fulfilled(_) => "fulfilled",
            FulfillmentOutcome::AlreadyProcessed => "already_processed",
            FulfillmentOutcome::AlreadyFulfilled { .. } => "already_fulfilled",
            FulfillmentOutcome::PaymentFailed { .. } => "payment_failed",
            FulfillmentOutcome::Ignored { .. } => "ignored",
        }
    }
}

/// Transition log of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentRun {
    pub event_id: String,
    history: Vec<FulfillmentState>,
}

impl FulfillmentRun {
    fn new(event_id: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            history: vec![FulfillmentState::Verified],
        }
    }

    fn transition(&mut self, next: FulfillmentState) {
        debug_assert!(
            self.state().can_transition_to(next),
            "illegal transition {} -> {}",
            self.state(),
            next
        );
        tracing::debug!(from = %self.state(), to = %next, "fulfillment transition");
        self.history.push(next);
    }

    /// Current state.
    pub fn state(&self) -> FulfillmentState {
        self.history
            .last()
            .copied()
            .unwrap_or(FulfillmentState::Verified)
    }

    /// Every state the run passed through, in order.
    pub fn history(&self) -> &[FulfillmentState] {
        &self.history
    }
}

struct Reconstruction {
    user_id: UserId,
    lines: Vec<PricedLine>,
    total: Money,
}

/// Drives a payment notification through claim, reconstruction, commit
/// and post-commit effects.
pub struct FulfillmentOrchestrator<S, C, P, N, D>
where
    S: OrderStore,
    C: CatalogGateway,
    P: PaymentProvider,
    N: Notifier,
    D: EventDeduplicator,
{
    verifier: WebhookVerifier,
    store: S,
    catalog: C,
    provider: P,
    notifier: N,
    dedup: D,
    settings: FulfillmentSettings,
    /// Order numbers whose commit timed out without a confirmed outcome.
    unconfirmed_commits: Arc<Mutex<HashSet<String>>>,
}

impl<S, C, P, N, D> FulfillmentOrchestrator<S, C, P, N, D>
where
    S: OrderStore,
    C: CatalogGateway,
    P: PaymentProvider,
    N: Notifier,
    D: EventDeduplicator,
{
    /// Creates a new orchestrator.
    pub fn new(
        verifier: WebhookVerifier,
        store: S,
        catalog: C,
        provider: P,
        notifier: N,
        dedup: D,
    ) -> Self {
        Self {
            verifier,
            store,
            catalog,
            provider,
            notifier,
            dedup,
            settings: FulfillmentSettings::default(),
            unconfirmed_commits: Arc::default(),
        }
    }

    pub fn with_settings(mut self, settings: FulfillmentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Order numbers whose commit timed out and could not be confirmed since.
    ///
    /// If such an order did land, its post-commit effects never ran.
    pub async fn unconfirmed_commits(&self) -> Vec<String> {
        let mut numbers: Vec<String> = self.unconfirmed_commits.lock().await.iter().cloned().collect();
        numbers.sort();
        numbers
    }

    /// Verifies a raw webhook delivery and handles it.
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<FulfillmentOutcome> {
        let event = match self.verifier.verify(body, signature) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "webhook rejected");
                metrics::counter!("webhook_rejected_total").increment(1);
                return Err(e.into());
            }
        };
        self.handle(event).await
    }

    /// Handles an already verified event.
    pub async fn handle(&self, event: PaymentEvent) -> Result<FulfillmentOutcome> {
        self.process(event).await.1
    }

    /// Handles an already verified event and returns its transition log.
    #[tracing::instrument(
        skip(self, event),
        fields(event_id = %event.event_id, event_type = %event.event_type, session_id = %event.session_id)
    )]
    pub async fn process(
        &self,
        event: PaymentEvent,
    ) -> (FulfillmentRun, Result<FulfillmentOutcome>) {
        let mut run = FulfillmentRun::new(&event.event_id);

        if !event.is_checkout_completed() {
            let outcome = if event.event_type == PAYMENT_INTENT_FAILED {
                tracing::warn!(payment_intent = ?event.payment_intent, "payment failed");
                FulfillmentOutcome::PaymentFailed {
                    session_id: event.session_id.clone(),
                }
            } else {
                tracing::debug!("event type ignored");
                FulfillmentOutcome::Ignored {
                    event_type: event.event_type.clone(),
                }
            };
            metrics::counter!("fulfillment_runs_total", "outcome" => outcome.as_str()).increment(1);
            return (run, Ok(outcome));
        }

        let started = Instant::now();
        let result = self.fulfill(&mut run, &event).await;

        match &result {
            Ok(outcome) => {
                metrics::counter!("fulfillment_runs_total", "outcome" => outcome.as_str())
                    .increment(1);
            }
            Err(e) => {
                let reason = e.reason();
                tracing::error!(error = %e, reason = reason.as_str(), "fulfillment failed");
                metrics::counter!("fulfillment_failed_total", "reason" => reason.as_str())
                    .increment(1);
            }
        }
        metrics::histogram!("fulfillment_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        (run, result)
    }

    async fn fulfill(
        &self,
        run: &mut FulfillmentRun,
        event: &PaymentEvent,
    ) -> Result<FulfillmentOutcome> {
        let event_id = event.event_id.as_str();

        // Claimed
        let token = match self.dedup.claim(event_id).await {
            Ok(ClaimOutcome::Acquired(token)) => {
                run.transition(FulfillmentState::Claimed);
                token
            }
            Ok(ClaimOutcome::AlreadyProcessed) => {
                run.transition(FulfillmentState::Claimed);
                run.transition(FulfillmentState::Done);
                tracing::info!("event already processed");
                metrics::counter!("fulfillment_duplicates_total", "stage" => "claim").increment(1);
                return Ok(FulfillmentOutcome::AlreadyProcessed);
            }
            Err(e) => {
                let err = FulfillmentError::from(e);
                run.transition(FulfillmentState::Failed(err.reason()));
                return Err(err);
            }
        };

        // Reconstructed
        let reconstruction = match self.reconstruct(event).await {
            Ok(r) => r,
            Err(err) => return Err(self.fail_before_commit(run, event_id, token, err).await),
        };
        run.transition(FulfillmentState::Reconstructed);

        if let Some(paid) = event.amount_total
            && paid != reconstruction.total
        {
            tracing::warn!(
                paid = %paid,
                reconstructed = %reconstruction.total,
                "amount_total differs from reconstructed total"
            );
        }

        // Committed
        let new_order = self.new_order(event, &reconstruction);
        let order_number = new_order.order_number.clone();
        let commit = match tokio::time::timeout(
            self.settings.upstream_timeout,
            self.store.create_order_with_items_and_clear_cart(new_order),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => self.confirm_timed_out_commit(&order_number).await,
        };

        let order_id = match commit {
            Ok(order_id) => order_id,
            Err(StoreError::DuplicateOrder { order_number }) => {
                self.complete_claim(event_id, token).await;
                run.transition(FulfillmentState::Done);
                tracing::info!(%order_number, "order already exists for session");
                metrics::counter!("fulfillment_duplicates_total", "stage" => "order").increment(1);
                if self.unconfirmed_commits.lock().await.remove(&order_number) {
                    tracing::warn!(
                        %order_number,
                        "order landed after a timed-out commit; post-commit effects did not run"
                    );
                    metrics::counter!("fulfillment_effects_unconfirmed_total").increment(1);
                }
                return Ok(FulfillmentOutcome::AlreadyFulfilled { order_number });
            }
            Err(e) => return Err(self.fail_before_commit(run, event_id, token, e.into()).await),
        };
        run.transition(FulfillmentState::Committed);
        tracing::info!(%order_number, %order_id, "order committed");
        self.unconfirmed_commits.lock().await.remove(&order_number);
        self.complete_claim(event_id, token).await;

        // SideEffectsDispatched
        let effects = self.post_commit_effects(event, &reconstruction, &order_number);
        let warnings = effects::dispatch(
            &self.catalog,
            &self.notifier,
            effects,
            &self.settings.effect_policy,
        )
        .await;
        run.transition(FulfillmentState::SideEffectsDispatched);
        for warning in &warnings {
            tracing::warn!(%order_number, %warning, "partial fulfillment");
        }

        run.transition(FulfillmentState::Done);
        Ok(FulfillmentOutcome::Fulfilled(FulfillmentReport {
            order_id,
            order_number,
            total: reconstruction.total,
            warnings,
        }))
    }

    /// Records the failure and settles the claim: retryable failures release
    /// it for redelivery, permanent ones complete it.
    async fn fail_before_commit(
        &self,
        run: &mut FulfillmentRun,
        event_id: &str,
        token: ClaimToken,
        err: FulfillmentError,
    ) -> FulfillmentError {
        run.transition(FulfillmentState::Failed(err.reason()));
        let settled = if err.is_retryable() {
            self.dedup.release(event_id, token).await
        } else {
            self.dedup.complete(event_id, token).await
        };
        match settled {
            Ok(true) => {}
            Ok(false) => tracing::warn!("claim was taken over by another run; left as is"),
            Err(e) => tracing::warn!(error = %e, "could not settle claim; it will expire"),
        }
        err
    }

    async fn complete_claim(&self, event_id: &str, token: ClaimToken) {
        match self.dedup.complete(event_id, token).await {
            Ok(true) => {}
            // The order number constraint still blocks a second order.
            Ok(false) => tracing::warn!("claim was taken over by another run before completion"),
            Err(e) => tracing::warn!(error = %e, "could not complete claim"),
        }
    }

    /// Decides what a timed-out commit did. A dropped write may still have
    /// landed, so the order is looked up once before the attempt is failed.
    async fn confirm_timed_out_commit(&self, order_number: &str) -> order_store::Result<OrderId> {
        let lookup = tokio::time::timeout(
            self.settings.upstream_timeout,
            self.store.get_order_by_number(order_number),
        )
        .await;

        if let Ok(Ok(Some(order))) = lookup {
            tracing::warn!(%order_number, "order commit timed out but the order landed");
            return Ok(order.id);
        }

        tracing::warn!(%order_number, "order commit timed out; outcome unconfirmed");
        self.unconfirmed_commits
            .lock()
            .await
            .insert(order_number.to_string());
        Err(StoreError::Unavailable("order commit timed out".to_string()))
    }

    async fn reconstruct(&self, event: &PaymentEvent) -> Result<Reconstruction> {
        let CartMetadata { user_id, lines } = metadata::decode(&event.metadata)
            .map_err(|e| FulfillmentError::MetadataCorrupt(e.to_string()))?;
        if lines.is_empty() {
            return Err(FulfillmentError::MetadataCorrupt(
                "session metadata lists no items".to_string(),
            ));
        }

        let items = tokio::time::timeout(
            self.settings.upstream_timeout,
            self.provider.retrieve_line_items(&event.session_id),
        )
        .await
        .map_err(|_| FulfillmentError::Provider("line item lookup timed out".to_string()))?
        .map_err(|e| FulfillmentError::Provider(e.to_string()))?;

        if items.len() != lines.len() {
            return Err(FulfillmentError::MetadataCorrupt(format!(
                "metadata lists {} items but the provider charged {}",
                lines.len(),
                items.len()
            )));
        }

        let mut priced = Vec::with_capacity(lines.len());
        let mut total = Money::zero();
        for (index, (line, item)) in lines.into_iter().zip(items).enumerate() {
            check_line_item(index, line.quantity, &item)?;
            total = total
                .checked_add(item.amount_total)
                .ok_or_else(|| FulfillmentError::MetadataCorrupt("total overflow".to_string()))?;
            priced.push(PricedLine::new(
                line.catalog_id,
                line.quantity,
                item.unit_amount,
                item.description,
            ));
        }

        Ok(Reconstruction {
            user_id,
            lines: priced,
            total,
        })
    }

    fn new_order(&self, event: &PaymentEvent, reconstruction: &Reconstruction) -> NewOrder {
        let currency = event
            .currency
            .clone()
            .unwrap_or_else(|| self.settings.default_currency.clone());

        reconstruction.lines.iter().fold(
            NewOrder::for_session(reconstruction.user_id, event.session_id.clone())
                .currency(currency)
                .payment_intent(event.payment_intent.clone())
                .customer_email(event.customer_email.clone()),
            |order, line| {
                order.item(NewOrderItem::new(
                    line.catalog_id.clone(),
                    line.display_name.clone(),
                    line.quantity,
                    line.unit_price,
                ))
            },
        )
    }

    fn post_commit_effects(
        &self,
        event: &PaymentEvent,
        reconstruction: &Reconstruction,
        order_number: &str,
    ) -> Vec<PostCommitEffect> {
        let mut effects: Vec<PostCommitEffect> = reconstruction
            .lines
            .iter()
            .map(|l| {
                PostCommitEffect::DecrementInventory(InventoryAdjustment::decrement(
                    l.catalog_id.clone(),
                    l.quantity,
                ))
            })
            .collect();

        match &event.customer_email {
            Some(email) => effects.push(PostCommitEffect::SendConfirmation(Box::new(
                OrderSummary {
                    order_number: order_number.to_string(),
                    user_id: reconstruction.user_id,
                    customer_email: email.clone(),
                    customer_name: event.customer_name.clone(),
                    currency: event
                        .currency
                        .clone()
                        .unwrap_or_else(|| self.settings.default_currency.clone()),
                    total: reconstruction.total,
                    lines: reconstruction
                        .lines
                        .iter()
                        .map(|l| SummaryLine {
                            name: l.display_name.clone(),
                            quantity: l.quantity,
                            unit_price: l.unit_price,
                            total_price: l.total_price(),
                        })
                        .collect(),
                },
            ))),
            None => tracing::info!("no customer email; confirmation skipped"),
        }

        effects
    }
}

fn check_line_item(index: usize, quantity: u32, item: &SessionLineItem) -> Result<()> {
    if item.quantity != quantity {
        return Err(FulfillmentError::MetadataCorrupt(format!(
            "item {index}: metadata quantity {quantity}, provider quantity {}",
            item.quantity
        )));
    }
    if !item.unit_amount.is_positive() {
        return Err(FulfillmentError::MetadataCorrupt(format!(
            "item {index}: unit amount {} is not positive",
            item.unit_amount
        )));
    }
    if item.unit_amount.checked_mul(item.quantity) != Some(item.amount_total) {
        return Err(FulfillmentError::MetadataCorrupt(format!(
            "item {index}: {} x {} does not equal {}",
            item.unit_amount, item.quantity, item.amount_total
        )));
    }
    Ok(())
}
