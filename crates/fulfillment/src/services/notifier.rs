//! Notification service trait, a logging notifier and an in-memory fake.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use common::{Money, UserId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

/// One purchased line in a confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryLine {
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
}

/// What the payment confirmation email is rendered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub order_number: String,
    pub user_id: UserId,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub currency: String,
    pub total: Money,
    pub lines: Vec<SummaryLine>,
}

#[derive(Debug, Clone, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Trait for customer notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends the payment confirmation for an order.
    async fn send(&self, summary: &OrderSummary) -> Result<(), NotifyError>;
}

/// Notifier that writes each confirmation to the log and keeps nothing.
///
/// The server uses this until a mail transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, summary: &OrderSummary) -> Result<(), NotifyError> {
        tracing::info!(
            order_number = %summary.order_number,
            email = %summary.customer_email,
            total = summary.total.minor(),
            currency = %summary.currency,
            lines = summary.lines.len(),
            "order confirmation"
        );
        Ok(())
    }
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<RwLock<Vec<OrderSummary>>>,
    fail_always: Arc<AtomicBool>,
    fail_next: Arc<AtomicU32>,
}

impl InMemoryNotifier {
    /// Creates a new in-memory notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail every send.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    /// Fails the next `count` sends, then recovers.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Returns every confirmation sent so far.
    pub async fn sent(&self) -> Vec<OrderSummary> {
        self.sent.read().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, summary: &OrderSummary) -> Result<(), NotifyError> {
        if self.fail_always.load(Ordering::SeqCst) {
            return Err(NotifyError("smtp unavailable".to_string()));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(NotifyError("smtp busy".to_string()));
        }

        self.sent.write().await.push(summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> OrderSummary {
        OrderSummary {
            order_number: "ORD-1".to_string(),
            user_id: UserId::new(),
            customer_email: "a@b.test".to_string(),
            customer_name: None,
            currency: "egp".to_string(),
            total: Money::from_minor(100),
            lines: vec![],
        }
    }

    #[tokio::test]
    async fn test_send_records_summary() {
        let notifier = InMemoryNotifier::new();
        notifier.send(&summary()).await.unwrap();
        assert_eq!(notifier.sent_count().await, 1);
        assert_eq!(notifier.sent().await[0].order_number, "ORD-1");
    }

    #[tokio::test]
    async fn test_fail_next_recovers() {
        let notifier = InMemoryNotifier::new();
        notifier.fail_next(2);
        assert!(notifier.send(&summary()).await.is_err());
        assert!(notifier.send(&summary()).await.is_err());
        assert!(notifier.send(&summary()).await.is_ok());
        assert_eq!(notifier.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_log_notifier_keeps_no_state() {
        let notifier = LogNotifier;
        for _ in 0..1000 {
            notifier.send(&summary()).await.unwrap();
        }
        assert_eq!(std::mem::size_of_val(&notifier), 0);
    }

    #[tokio::test]
    async fn test_fail_on_send() {
        let notifier = InMemoryNotifier::new();
        notifier.set_fail_on_send(true);
        assert!(notifier.send(&summary()).await.is_err());
        assert_eq!(notifier.sent_count().await, 0);
    }
}
