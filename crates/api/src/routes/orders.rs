//! Order endpoints: lookup, per-user history and status changes.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use common::Money;
use fulfillment::EventDeduplicator;
use order_store::{Order, OrderStatus, OrderStore};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::carts::parse_user_id;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 100;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub skip: usize,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_number: String,
    pub user_id: String,
    pub status: String,
    pub payment_status: String,
    pub total_amount: Money,
    pub currency: String,
    pub payment_session_id: String,
    pub payment_intent_id: Option<String>,
    pub customer_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub catalog_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
}

/// GET /orders/:order_number: load an order with its items.
#[tracing::instrument(skip(state))]
pub async fn get<S, D>(
    State(state): State<Arc<AppState<S, D>>>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: OrderStore + 'static,
    D: EventDeduplicator + 'static,
{
    let order = state
        .store
        .get_order_by_number(&order_number)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_number} not found")))?;

    Ok(Json(order_response(&state.store, order).await?))
}

/// GET /users/:user_id/orders: the user's orders, newest first.
///
/// Paged with `skip` and `limit`; `limit` is capped at 100.
#[tracing::instrument(skip(state, page))]
pub async fn list_for_user<S, D>(
    State(state): State<Arc<AppState<S, D>>>,
    Path(user_id): Path<String>,
    Query(page): Query<PageParams>,
) -> Result<Json<Vec<OrderResponse>>, ApiError>
where
    S: OrderStore + 'static,
    D: EventDeduplicator + 'static,
{
    let user_id = parse_user_id(&user_id)?;
    let limit = page.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);

    let orders = state
        .store
        .list_orders_for_user(user_id, page.skip, limit)
        .await?;

    let mut responses = Vec::with_capacity(orders.len());
    for order in orders {
        responses.push(order_response(&state.store, order).await?);
    }
    Ok(Json(responses))
}

/// PATCH /orders/:order_number/status: move an order along its lifecycle.
///
/// Forbidden moves, such as cancelling a shipped order, answer 409.
#[tracing::instrument(skip(state, req))]
pub async fn update_status<S, D>(
    State(state): State<Arc<AppState<S, D>>>,
    Path(order_number): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: OrderStore + 'static,
    D: EventDeduplicator + 'static,
{
    let order = state
        .store
        .update_order_status(&order_number, req.status)
        .await?;
    tracing::info!(%order_number, status = %order.status, "order status updated");

    Ok(Json(order_response(&state.store, order).await?))
}

async fn order_response<S: OrderStore>(store: &S, order: Order) -> Result<OrderResponse, ApiError> {
    let items = store
        .get_order_items(order.id)
        .await?
        .into_iter()
        .map(|item| OrderItemResponse {
            catalog_id: item.catalog_id.to_string(),
            name: item.name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.total_price,
        })
        .collect();

    Ok(OrderResponse {
        id: order.id.to_string(),
        order_number: order.order_number,
        user_id: order.user_id.to_string(),
        status: order.status.to_string(),
        payment_status: order.payment_status.to_string(),
        total_amount: order.total_amount,
        currency: order.currency,
        payment_session_id: order.payment_session_id,
        payment_intent_id: order.payment_intent_id,
        customer_email: order.customer_email,
        created_at: order.created_at,
        items,
    })
}
