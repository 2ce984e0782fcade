use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{CartLine, OrderId, UserId};
use tokio::sync::RwLock;

use crate::{
    Cart, NewOrder, Order, OrderItem, OrderStatus, OrderStore, PaymentStatus, Result, StoreError,
};

#[derive(Debug, Clone, Default)]
struct StoreState {
    orders: HashMap<OrderId, Order>,
    order_numbers: HashMap<String, OrderId>,
    items: HashMap<OrderId, Vec<OrderItem>>,
    carts: HashMap<UserId, Cart>,
}

impl StoreState {
    fn order_mut(&mut self, order_number: &str) -> Result<&mut Order> {
        self.order_numbers
            .get(order_number)
            .and_then(|id| self.orders.get_mut(id))
            .ok_or_else(|| StoreError::OrderNotFound(order_number.to_string()))
    }
}

/// In-memory order store implementation for testing.
///
/// Writes are staged on a copy of the state and swapped in only when the
/// whole operation succeeds, which gives the same all-or-nothing behaviour
/// as the PostgreSQL transaction.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<StoreState>>,
    fail_before_cart_clear: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes order creation fail after the order and items are staged but
    /// before the cart is cleared.
    pub fn set_fail_before_cart_clear(&self, fail: bool) {
        self.fail_before_cart_clear.store(fail, Ordering::SeqCst);
    }

    /// Returns the total number of stored order items.
    pub async fn item_count(&self) -> usize {
        self.state.read().await.items.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order_with_items_and_clear_cart(&self, new_order: NewOrder) -> Result<OrderId> {
        let (order, items) = new_order.materialize()?;
        let order_id = order.id;
        let user_id = order.user_id;

        let mut state = self.state.write().await;

        if state.order_numbers.contains_key(&order.order_number) {
            return Err(StoreError::DuplicateOrder {
                order_number: order.order_number,
            });
        }

        let mut staged = state.clone();
        staged
            .order_numbers
            .insert(order.order_number.clone(), order_id);
        staged.orders.insert(order_id, order);
        staged.items.insert(order_id, items);

        if self.fail_before_cart_clear.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "write interrupted before cart clear".to_string(),
            ));
        }

        if let Some(cart) = staged.carts.get_mut(&user_id) {
            cart.items.clear();
            cart.updated_at = Utc::now();
        }

        *state = staged;
        Ok(order_id)
    }

    async fn get_cart_items(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let state = self.state.read().await;
        Ok(state
            .carts
            .get(&user_id)
            .map(|cart| cart.items.clone())
            .unwrap_or_default())
    }

    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        Ok(self.state.read().await.carts.get(&user_id).cloned())
    }

    async fn replace_cart(&self, user_id: UserId, items: Vec<CartLine>) -> Result<Cart> {
        let mut state = self.state.write().await;
        let cart = state
            .carts
            .entry(user_id)
            .or_insert_with(|| Cart::empty(user_id));
        cart.items = items;
        cart.updated_at = Utc::now();
        Ok(cart.clone())
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.carts.get_mut(&user_id) {
            Some(cart) => {
                cart.items.clear();
                cart.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .order_numbers
            .get(order_number)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.order_number.cmp(&b.order_number))
        });
        Ok(orders.into_iter().skip(skip).take(limit).collect())
    }

    async fn update_order_status(&self, order_number: &str, status: OrderStatus) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state.order_mut(order_number)?;

        if order.status != status {
            if !order.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    from: order.status.to_string(),
                    to: status.to_string(),
                });
            }
            order.status = status;
        }
        Ok(order.clone())
    }

    async fn update_payment_status(
        &self,
        order_number: &str,
        status: PaymentStatus,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state.order_mut(order_number)?;

        if order.payment_status != status {
            if !order.payment_status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    from: order.payment_status.to_string(),
                    to: status.to_string(),
                });
            }
            order.payment_status = status;
        }
        Ok(order.clone())
    }

    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let state = self.state.read().await;
        Ok(state.items.get(&order_id).cloned().unwrap_or_default())
    }

    async fn order_count(&self) -> Result<usize> {
        Ok(self.state.read().await.orders.len())
    }
}
