//! Persistent records: orders, order items and carts.

use chrono::{DateTime, Utc};
use common::{CartLine, CatalogId, Money, OrderId, UserId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Fulfillment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Shipped,
    Cancelled,
    Failed,
}

impl OrderStatus {
    /// Returns the status as its stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }

    /// Parses a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "completed" => Some(OrderStatus::Completed),
            "shipped" => Some(OrderStatus::Shipped),
            "cancelled" => Some(OrderStatus::Cancelled),
            "failed" => Some(OrderStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if an order in this status may move to `next`.
    ///
    /// Cancellation is only possible before the order ships. Completed,
    /// cancelled and failed orders are final.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing | Cancelled | Failed)
                | (Processing, Shipped | Completed | Cancelled | Failed)
                | (Shipped, Completed)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Returns the status as its stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Parses a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// Returns true if a payment in this status may move to `next`.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Paid | Failed) | (Failed, Paid) | (Paid, Refunded)
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable order, created exactly once per payment session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Money,
    pub currency: String,
    pub payment_session_id: String,
    pub payment_intent_id: Option<String>,
    pub customer_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A line of an order. Only ever created together with its order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: OrderId,
    pub catalog_id: CatalogId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
}

/// A user's cart. Exactly one per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: UserId,
    pub items: Vec<CartLine>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Creates an empty cart for a user.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            items: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Returns true if the cart has no lines.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Derives the order number for a payment session.
///
/// The full SHA-256 digest of the session id is used so that two sessions
/// can never share an order number; the same session always maps to the
/// same number, which is what makes order creation idempotent.
pub fn order_number_for_session(session_id: &str) -> String {
    let digest = Sha256::digest(session_id.as_bytes());
    format!("ORD-{}", hex::encode(digest))
}

/// An item of an order that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub catalog_id: CatalogId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl NewOrderItem {
    /// Creates a new order item.
    pub fn new(
        catalog_id: impl Into<CatalogId>,
        name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            name: name.into(),
            quantity,
            unit_price,
        }
    }
}

/// An order to be written by
/// [`OrderStore::create_order_with_items_and_clear_cart`](crate::OrderStore::create_order_with_items_and_clear_cart).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_number: String,
    pub payment_session_id: String,
    pub payment_intent_id: Option<String>,
    pub customer_email: Option<String>,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub items: Vec<NewOrderItem>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Starts a paid order for a payment session.
    ///
    /// The order number is derived from `session_id`.
    pub fn for_session(user_id: UserId, session_id: impl Into<String>) -> Self {
        let payment_session_id = session_id.into();
        Self {
            id: OrderId::new(),
            user_id,
            order_number: order_number_for_session(&payment_session_id),
            payment_session_id,
            payment_intent_id: None,
            customer_email: None,
            currency: String::new(),
            status: OrderStatus::Processing,
            payment_status: PaymentStatus::Paid,
            items: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Sets the currency code.
    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Sets the provider's payment intent reference.
    pub fn payment_intent(mut self, payment_intent_id: Option<String>) -> Self {
        self.payment_intent_id = payment_intent_id;
        self
    }

    /// Sets the customer email.
    pub fn customer_email(mut self, email: Option<String>) -> Self {
        self.customer_email = email;
        self
    }

    /// Appends an item.
    pub fn item(mut self, item: NewOrderItem) -> Self {
        self.items.push(item);
        self
    }

    /// Checks the order invariants and returns the order total.
    ///
    /// Every order needs at least one item, every item a positive quantity and
    /// price, and no line or total may overflow.
    pub fn validate(&self) -> Result<Money> {
        if self.items.is_empty() {
            return Err(StoreError::InvalidOrder(
                "an order needs at least one item".to_string(),
            ));
        }
        if self.order_number.is_empty() {
            return Err(StoreError::InvalidOrder(
                "order number is required".to_string(),
            ));
        }

        let mut total = Money::zero();
        for item in &self.items {
            if item.quantity == 0 {
                return Err(StoreError::InvalidOrder(format!(
                    "item {} has zero quantity",
                    item.catalog_id
                )));
            }
            if !item.unit_price.is_positive() {
                return Err(StoreError::InvalidOrder(format!(
                    "item {} has non-positive unit price {}",
                    item.catalog_id,
                    item.unit_price.minor()
                )));
            }
            let line_total = item
                .unit_price
                .checked_mul(item.quantity)
                .ok_or_else(|| StoreError::InvalidOrder("line total overflow".to_string()))?;
            total = total
                .checked_add(line_total)
                .ok_or_else(|| StoreError::InvalidOrder("order total overflow".to_string()))?;
        }
        Ok(total)
    }

    /// Validates and turns the order into the records to write.
    pub fn materialize(&self) -> Result<(Order, Vec<OrderItem>)> {
        let total_amount = self.validate()?;

        let order = Order {
            id: self.id,
            user_id: self.user_id,
            order_number: self.order_number.clone(),
            status: self.status,
            payment_status: self.payment_status,
            total_amount,
            currency: self.currency.clone(),
            payment_session_id: self.payment_session_id.clone(),
            payment_intent_id: self.payment_intent_id.clone(),
            customer_email: self.customer_email.clone(),
            created_at: self.created_at,
        };

        // validate() already proved these products cannot overflow
        let items = self
            .items
            .iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                order_id: self.id,
                catalog_id: item.catalog_id.clone(),
                name: item.name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.unit_price.checked_mul(item.quantity).unwrap_or_default(),
            })
            .collect();

        Ok((order, items))
    }
}
