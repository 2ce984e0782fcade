//! Integration tests for checkout-to-fulfillment flows over the in-memory services.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use checkout::{
    CatalogProduct, CheckoutLimits, CheckoutService, CheckoutSessionBuilder, CheckoutSettings,
    InMemoryCatalog, InMemoryPaymentProvider, PricingValidator,
};
use common::{CartLine, CatalogId, Money, UserId};
use fulfillment::{
    DedupPolicy, EffectPolicy, EventDeduplicator, FulfillmentError, FulfillmentOrchestrator,
    FulfillmentOutcome, FulfillmentSettings, InMemoryDeduplicator, InMemoryNotifier,
    WebhookError, WebhookVerifier, signature_header,
};
use order_store::{InMemoryOrderStore, OrderStore, order_number_for_session};

const SECRET: &str = "whsec_integration";

type TestOrchestrator = FulfillmentOrchestrator<
    InMemoryOrderStore,
    InMemoryCatalog,
    InMemoryPaymentProvider,
    InMemoryNotifier,
    InMemoryDeduplicator,
>;

struct TestHarness {
    orchestrator: Arc<TestOrchestrator>,
    checkout: CheckoutService<InMemoryCatalog, InMemoryPaymentProvider>,
    store: InMemoryOrderStore,
    catalog: InMemoryCatalog,
    provider: InMemoryPaymentProvider,
    notifier: InMemoryNotifier,
    dedup: InMemoryDeduplicator,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_policy(DedupPolicy::default())
    }

    fn with_policy(policy: DedupPolicy) -> Self {
        let store = InMemoryOrderStore::new();
        let catalog = InMemoryCatalog::with_products([
            CatalogProduct::new("P1", "Widget", Money::from_minor(100), 10),
            CatalogProduct::new("P2", "Gadget", Money::from_minor(250), 10),
        ]);
        let provider = InMemoryPaymentProvider::new();
        let notifier = InMemoryNotifier::new();
        let dedup = InMemoryDeduplicator::new(policy);

        let checkout = CheckoutService::new(
            PricingValidator::new(catalog.clone()).with_limits(CheckoutLimits {
                minimum_total: Money::from_minor(100),
                ..CheckoutLimits::default()
            }),
            CheckoutSessionBuilder::new(provider.clone(), CheckoutSettings::default()),
        );

        let orchestrator = FulfillmentOrchestrator::new(
            WebhookVerifier::new(SECRET),
            store.clone(),
            catalog.clone(),
            provider.clone(),
            notifier.clone(),
            dedup.clone(),
        )
        .with_settings(FulfillmentSettings {
            effect_policy: EffectPolicy {
                timeout: Duration::from_millis(500),
                max_attempts: 2,
                backoff: Duration::from_millis(1),
            },
            ..FulfillmentSettings::default()
        });

        Self {
            orchestrator: Arc::new(orchestrator),
            checkout,
            store,
            catalog,
            provider,
            notifier,
            dedup,
        }
    }

    /// Puts `lines` in the user's cart and checks out under `session_id`.
    async fn checkout(&self, user_id: UserId, session_id: &str, lines: Vec<CartLine>) {
        self.store.replace_cart(user_id, lines.clone()).await.unwrap();
        self.provider.queue_session_id(session_id).await;
        let session = self
            .checkout
            .start_checkout(user_id, Some("buyer@example.com".to_string()), &lines)
            .await
            .unwrap();
        assert_eq!(session.session_id, session_id);
    }

    /// Builds the completion webhook the provider would send for a session.
    async fn completion_body(&self, event_id: &str, session_id: &str) -> Vec<u8> {
        let request = self.provider.session(session_id).await.unwrap();
        let total: i64 = request
            .lines
            .iter()
            .map(|l| l.unit_amount.minor() * i64::from(l.quantity))
            .sum();
        completion_body(event_id, session_id, total, &request.metadata)
    }

    async fn deliver(&self, body: &[u8]) -> Result<FulfillmentOutcome, FulfillmentError> {
        let header = signature_header(SECRET, body, chrono::Utc::now().timestamp());
        self.orchestrator.handle_webhook(body, Some(&header)).await
    }
}

fn completion_body(
    event_id: &str,
    session_id: &str,
    amount_total: i64,
    metadata: &BTreeMap<String, String>,
) -> Vec<u8> {
    serde_json::json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "amount_total": amount_total,
            "currency": "egp",
            "customer_details": { "email": "buyer@example.com", "name": "Buyer" },
            "payment_intent": "pi_123",
            "metadata": metadata
        }}
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn test_sess_abc_delivered_twice_yields_one_order() {
    let h = TestHarness::new();
    let user_id = UserId::new();
    h.checkout(user_id, "sess_abc", vec![CartLine::new("P1", 2)])
        .await;

    let request = h.provider.session("sess_abc").await.unwrap();
    assert_eq!(request.metadata.get("item_0_id").map(String::as_str), Some("P1"));
    assert_eq!(request.metadata.get("item_0_qty").map(String::as_str), Some("2"));

    let body = h.completion_body("evt_abc", "sess_abc").await;
    let first = h.deliver(&body).await.unwrap();
    let second = h.deliver(&body).await.unwrap();

    let FulfillmentOutcome::Fulfilled(report) = first else {
        panic!("expected fulfillment, got {first:?}");
    };
    assert!(report.warnings.is_empty());
    assert_eq!(second, FulfillmentOutcome::AlreadyProcessed);

    assert_eq!(h.store.order_count().await.unwrap(), 1);
    let order = h
        .store
        .get_order_by_number(&order_number_for_session("sess_abc"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.order_number, report.order_number);
    assert_eq!(order.total_amount, Money::from_minor(200));
    assert_eq!(order.payment_intent_id.as_deref(), Some("pi_123"));

    let items = h.store.get_order_items(order.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].catalog_id.as_str(), "P1");
    assert_eq!(items[0].quantity, 2);
    assert_eq!(items[0].unit_price, Money::from_minor(100));
    assert_eq!(items[0].total_price, Money::from_minor(200));

    assert!(h.store.get_cart_items(user_id).await.unwrap().is_empty());
    assert_eq!(h.catalog.stock(&CatalogId::new("P1")).await, Some(8));
    assert_eq!(h.notifier.sent_count().await, 1);
}

#[tokio::test]
async fn test_tampered_signature_is_rejected() {
    let h = TestHarness::new();
    let user_id = UserId::new();
    h.checkout(user_id, "sess_tamper", vec![CartLine::new("P1", 2)])
        .await;

    let body = h.completion_body("evt_tamper", "sess_tamper").await;
    let header = signature_header("whsec_attacker", &body, chrono::Utc::now().timestamp());
    let result = h.orchestrator.handle_webhook(&body, Some(&header)).await;

    assert!(matches!(
        result,
        Err(FulfillmentError::Webhook(WebhookError::InvalidSignature(_)))
    ));
    assert_eq!(h.store.order_count().await.unwrap(), 0);
    assert_eq!(h.store.get_cart_items(user_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_n_deliveries_yield_one_order() {
    let h = TestHarness::new();
    let user_id = UserId::new();
    h.checkout(user_id, "sess_many", vec![CartLine::new("P1", 1), CartLine::new("P2", 2)])
        .await;

    let body = h.completion_body("evt_many", "sess_many").await;
    for _ in 0..10 {
        h.deliver(&body).await.unwrap();
    }

    // Same session re-sent under fresh event ids.
    for i in 0..3 {
        let body = h.completion_body(&format!("evt_many_{i}"), "sess_many").await;
        let outcome = h.deliver(&body).await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::AlreadyFulfilled { .. }));
    }

    assert_eq!(h.store.order_count().await.unwrap(), 1);
    assert_eq!(h.catalog.stock(&CatalogId::new("P2")).await, Some(8));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deliveries_yield_one_order() {
    let h = TestHarness::new();
    let user_id = UserId::new();
    h.checkout(user_id, "sess_race", vec![CartLine::new("P1", 3)])
        .await;

    let mut handles = Vec::new();
    for i in 0..8 {
        // Half share the event id, half carry their own.
        let event_id = if i % 2 == 0 {
            "evt_race".to_string()
        } else {
            format!("evt_race_{i}")
        };
        let body = h.completion_body(&event_id, "sess_race").await;
        let header = signature_header(SECRET, &body, chrono::Utc::now().timestamp());
        let orchestrator = Arc::clone(&h.orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator.handle_webhook(&body, Some(&header)).await
        }));
    }

    let mut fulfilled = 0;
    for handle in handles {
        if let FulfillmentOutcome::Fulfilled(_) = handle.await.unwrap().unwrap() {
            fulfilled += 1;
        }
    }

    assert_eq!(fulfilled, 1);
    assert_eq!(h.store.order_count().await.unwrap(), 1);
    assert_eq!(h.catalog.stock(&CatalogId::new("P1")).await, Some(7));
}

#[tokio::test]
async fn test_lost_dedup_cache_still_yields_one_order() {
    let h = TestHarness::new();
    let user_id = UserId::new();
    h.checkout(user_id, "sess_lost", vec![CartLine::new("P1", 1)])
        .await;

    let body = h.completion_body("evt_lost", "sess_lost").await;
    h.deliver(&body).await.unwrap();
    h.dedup.clear().await;

    let outcome = h.deliver(&body).await.unwrap();
    assert_eq!(
        outcome,
        FulfillmentOutcome::AlreadyFulfilled {
            order_number: order_number_for_session("sess_lost")
        }
    );
    assert_eq!(h.store.order_count().await.unwrap(), 1);
    assert_eq!(h.notifier.sent_count().await, 1);
}

#[tokio::test]
async fn test_interrupted_commit_leaves_nothing_and_redelivery_succeeds() {
    let h = TestHarness::new();
    let user_id = UserId::new();
    h.checkout(user_id, "sess_atomic", vec![CartLine::new("P1", 2)])
        .await;
    let body = h.completion_body("evt_atomic", "sess_atomic").await;

    h.store.set_fail_before_cart_clear(true);
    let result = h.deliver(&body).await;
    assert!(matches!(result, Err(FulfillmentError::Storage(_))));
    assert!(result.unwrap_err().is_retryable());

    assert_eq!(h.store.order_count().await.unwrap(), 0);
    assert_eq!(h.store.item_count().await, 0);
    assert_eq!(h.store.get_cart_items(user_id).await.unwrap().len(), 1);
    assert_eq!(h.catalog.decrement_calls(), 0);
    assert_eq!(h.notifier.sent_count().await, 0);

    h.store.set_fail_before_cart_clear(false);
    let outcome = h.deliver(&body).await.unwrap();
    assert!(matches!(outcome, FulfillmentOutcome::Fulfilled(_)));
    assert!(h.store.get_cart_items(user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_inventory_failure_is_isolated_from_order() {
    let h = TestHarness::new();
    let user_id = UserId::new();
    h.checkout(user_id, "sess_inv", vec![CartLine::new("P1", 1), CartLine::new("P2", 1)])
        .await;
    h.catalog.set_fail_on_decrement(true);

    let body = h.completion_body("evt_inv", "sess_inv").await;
    let outcome = h.deliver(&body).await.unwrap();

    let FulfillmentOutcome::Fulfilled(report) = outcome else {
        panic!("expected fulfillment, got {outcome:?}");
    };
    assert_eq!(report.warnings.len(), 2);
    assert!(
        report
            .warnings
            .iter()
            .all(|w| w.effect.starts_with("decrement_inventory:") && w.attempts == 2)
    );

    let order = h
        .store
        .get_order_by_number(&report.order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.total_amount, Money::from_minor(350));
    assert_eq!(h.notifier.sent_count().await, 1);

    // A redelivery must not retry the effects.
    assert_eq!(
        h.deliver(&body).await.unwrap(),
        FulfillmentOutcome::AlreadyProcessed
    );
    assert_eq!(h.catalog.decrement_calls(), 4);
}

#[tokio::test]
async fn test_corrupt_metadata_fails_once_then_noops() {
    let h = TestHarness::new();
    let user_id = UserId::new();
    h.checkout(user_id, "sess_bad", vec![CartLine::new("P1", 2)])
        .await;

    let mut metadata = h.provider.session("sess_bad").await.unwrap().metadata;
    metadata.insert("item_0_qty".to_string(), "5".to_string());
    let body = completion_body("evt_bad", "sess_bad", 200, &metadata);

    let result = h.deliver(&body).await;
    assert!(matches!(result, Err(FulfillmentError::MetadataCorrupt(_))));

    assert_eq!(
        h.deliver(&body).await.unwrap(),
        FulfillmentOutcome::AlreadyProcessed
    );
    assert_eq!(h.store.order_count().await.unwrap(), 0);
    assert_eq!(h.store.get_cart_items(user_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_amount_mismatch_still_stores_item_sum() {
    let h = TestHarness::new();
    let user_id = UserId::new();
    h.checkout(user_id, "sess_amt", vec![CartLine::new("P2", 2)])
        .await;

    let metadata = h.provider.session("sess_amt").await.unwrap().metadata;
    let body = completion_body("evt_amt", "sess_amt", 450, &metadata);
    let outcome = h.deliver(&body).await.unwrap();

    let FulfillmentOutcome::Fulfilled(report) = outcome else {
        panic!("expected fulfillment, got {outcome:?}");
    };
    assert_eq!(report.total, Money::from_minor(500));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_claim_self_heals() {
    let h = TestHarness::with_policy(DedupPolicy {
        claim_ttl: Duration::from_secs(60),
        retention_ttl: Duration::from_secs(3600),
    });
    let user_id = UserId::new();
    h.checkout(user_id, "sess_crash", vec![CartLine::new("P1", 1)])
        .await;

    // A worker claimed the event and died.
    h.dedup.claim("evt_crash").await.unwrap();

    let body = h.completion_body("evt_crash", "sess_crash").await;
    assert_eq!(
        h.deliver(&body).await.unwrap(),
        FulfillmentOutcome::AlreadyProcessed
    );
    assert_eq!(h.store.order_count().await.unwrap(), 0);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(matches!(
        h.deliver(&body).await.unwrap(),
        FulfillmentOutcome::Fulfilled(_)
    ));
    assert_eq!(h.store.order_count().await.unwrap(), 1);
}
