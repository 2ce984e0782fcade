//! Checkout endpoint: validate the cart and open a payment session.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use fulfillment::EventDeduplicator;
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use super::carts::{CartItemRequest, cart_lines, parse_user_id};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CheckoutRequest {
    pub user_id: String,
    pub customer_email: Option<String>,
    /// Items to buy; the stored cart is used when absent.
    pub items: Option<Vec<CartItemRequest>>,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub redirect_url: String,
}

/// POST /checkout: create a payment session for a cart.
#[tracing::instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn create<S, D>(
    State(state): State<Arc<AppState<S, D>>>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError>
where
    S: OrderStore + 'static,
    D: EventDeduplicator + 'static,
{
    let user_id = parse_user_id(&req.user_id)?;
    let lines = match req.items {
        Some(items) => cart_lines(items)?,
        None => state.store.get_cart_items(user_id).await?,
    };

    let session = state
        .checkout
        .start_checkout(user_id, req.customer_email, &lines)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            session_id: session.session_id,
            redirect_url: session.redirect_url,
        }),
    ))
}
