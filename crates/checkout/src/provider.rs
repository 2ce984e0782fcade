//! Payment provider boundary and in-memory implementation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// One line of a hosted payment page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLine {
    pub name: String,
    pub unit_amount: Money,
    pub quantity: u32,
}

/// Everything the provider needs to open a payment session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub currency: String,
    pub lines: Vec<SessionLine>,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// A session as created by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub id: String,
    pub url: String,
}

/// A line item as the provider charged it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_amount: Money,
    pub amount_total: Money,
}

impl From<&SessionLine> for SessionLineItem {
    fn from(line: &SessionLine) -> Self {
        Self {
            description: line.name.clone(),
            quantity: line.quantity,
            unit_amount: line.unit_amount,
            amount_total: line
                .unit_amount
                .checked_mul(line.quantity)
                .unwrap_or(Money::from_minor(i64::MAX)),
        }
    }
}

/// Errors returned by the payment provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    #[error("Payment provider rejected the request: {0}")]
    Rejected(String),

    #[error("Unknown payment session: {0}")]
    SessionNotFound(String),
}

/// Client for the external payment provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Opens a hosted payment session.
    async fn create_session(&self, request: SessionRequest)
    -> Result<ProviderSession, ProviderError>;

    /// Returns the line items the provider charged for a session.
    async fn retrieve_line_items(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionLineItem>, ProviderError>;
}

#[derive(Debug, Default)]
struct InMemoryProviderState {
    sessions: HashMap<String, SessionRequest>,
    line_item_overrides: HashMap<String, Vec<SessionLineItem>>,
    queued_ids: VecDeque<String>,
    next_id: u32,
}

/// In-memory payment provider for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentProvider {
    state: Arc<RwLock<InMemoryProviderState>>,
    fail_on_create: Arc<AtomicBool>,
    fail_on_retrieve: Arc<AtomicBool>,
}

impl InMemoryPaymentProvider {
    /// Creates a new in-memory provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the provider to fail session creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.fail_on_create.store(fail, Ordering::SeqCst);
    }

    /// Configures the provider to fail line item retrieval.
    pub fn set_fail_on_retrieve(&self, fail: bool) {
        self.fail_on_retrieve.store(fail, Ordering::SeqCst);
    }

    /// Uses `id` for the next created session instead of a generated one.
    pub async fn queue_session_id(&self, id: impl Into<String>) {
        self.state.write().await.queued_ids.push_back(id.into());
    }

    /// Replaces the line items reported for a session.
    pub async fn override_line_items(&self, session_id: &str, items: Vec<SessionLineItem>) {
        self.state
            .write()
            .await
            .line_item_overrides
            .insert(session_id.to_string(), items);
    }

    /// Returns the request a session was created from.
    pub async fn session(&self, session_id: &str) -> Option<SessionRequest> {
        self.state.read().await.sessions.get(session_id).cloned()
    }

    /// Returns the number of sessions created.
    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }
}

#[async_trait]
impl PaymentProvider for InMemoryPaymentProvider {
    async fn create_session(
        &self,
        request: SessionRequest,
    ) -> Result<ProviderSession, ProviderError> {
        if self.fail_on_create.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("connection reset".to_string()));
        }
        if request.lines.is_empty() {
            return Err(ProviderError::Rejected("line_items is empty".to_string()));
        }

        let mut state = self.state.write().await;
        let id = match state.queued_ids.pop_front() {
            Some(id) => id,
            None => {
                state.next_id += 1;
                format!("cs_test_{:04}", state.next_id)
            }
        };
        state.sessions.insert(id.clone(), request);

        Ok(ProviderSession {
            url: format!("https://pay.example.test/c/{id}"),
            id,
        })
    }

    async fn retrieve_line_items(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionLineItem>, ProviderError> {
        if self.fail_on_retrieve.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("connection reset".to_string()));
        }

        let state = self.state.read().await;
        if let Some(items) = state.line_item_overrides.get(session_id) {
            return Ok(items.clone());
        }
        state
            .sessions
            .get(session_id)
            .map(|request| request.lines.iter().map(SessionLineItem::from).collect())
            .ok_or_else(|| ProviderError::SessionNotFound(session_id.to_string()))
    }
}
