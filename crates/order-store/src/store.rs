use async_trait::async_trait;
use common::{CartLine, OrderId, UserId};

use crate::{Cart, NewOrder, Order, OrderItem, OrderStatus, PaymentStatus, Result};

/// Core trait for order store implementations.
///
/// Orders and carts are independent aggregates linked only by `user_id`.
/// The one operation that touches both is
/// [`create_order_with_items_and_clear_cart`](OrderStore::create_order_with_items_and_clear_cart),
/// which is atomic. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts the order and all its items and empties the user's cart, atomically.
    ///
    /// Fails with `DuplicateOrder` if the order number already exists, in which
    /// case nothing is written. Any other failure also leaves nothing behind.
    async fn create_order_with_items_and_clear_cart(&self, order: NewOrder) -> Result<OrderId>;

    /// Returns the user's cart lines in order; empty if the user has no cart.
    async fn get_cart_items(&self, user_id: UserId) -> Result<Vec<CartLine>>;

    /// Returns the user's cart, if one exists.
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>>;

    /// Replaces the user's cart contents (the user's own pre-checkout edit).
    async fn replace_cart(&self, user_id: UserId, items: Vec<CartLine>) -> Result<Cart>;

    /// Empties the user's cart. Returns false if the user had no cart.
    ///
    /// Fulfillment never calls this on its own; it clears the cart inside
    /// `create_order_with_items_and_clear_cart`.
    async fn clear_cart(&self, user_id: UserId) -> Result<bool>;

    /// Looks up an order by its order number.
    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>>;

    /// Returns a page of the user's orders, newest first.
    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Order>>;

    /// Moves an order to a new fulfillment status.
    ///
    /// Fails with `OrderNotFound` for an unknown number and with
    /// `InvalidTransition` when [`OrderStatus::can_transition_to`] forbids the
    /// move. Setting the current status again is a no-op.
    async fn update_order_status(&self, order_number: &str, status: OrderStatus) -> Result<Order>;

    /// Moves an order to a new payment status, with the same rules as
    /// [`update_order_status`](OrderStore::update_order_status).
    async fn update_payment_status(
        &self,
        order_number: &str,
        status: PaymentStatus,
    ) -> Result<Order>;

    /// Returns an order's items in their original line order.
    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>>;

    /// Returns the total number of orders.
    async fn order_count(&self) -> Result<usize>;
}
