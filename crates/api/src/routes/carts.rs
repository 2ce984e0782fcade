//! Cart endpoints: the user's pre-checkout edits.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::{CartLine, UserId};
use fulfillment::EventDeduplicator;
use order_store::{Cart, OrderStore};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct ReplaceCartRequest {
    pub items: Vec<CartItemRequest>,
}

#[derive(Deserialize)]
pub struct CartItemRequest {
    pub catalog_id: String,
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub user_id: String,
    pub items: Vec<CartItemResponse>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct CartItemResponse {
    pub catalog_id: String,
    pub quantity: u32,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        Self {
            user_id: cart.user_id.to_string(),
            items: cart
                .items
                .into_iter()
                .map(|line| CartItemResponse {
                    catalog_id: line.catalog_id.to_string(),
                    quantity: line.quantity,
                })
                .collect(),
            updated_at: Some(cart.updated_at),
        }
    }
}

// -- Handlers --

/// PUT /carts/:user_id: replace the user's cart.
#[tracing::instrument(skip(state, req))]
pub async fn put<S, D>(
    State(state): State<Arc<AppState<S, D>>>,
    Path(user_id): Path<String>,
    Json(req): Json<ReplaceCartRequest>,
) -> Result<Json<CartResponse>, ApiError>
where
    S: OrderStore + 'static,
    D: EventDeduplicator + 'static,
{
    let user_id = parse_user_id(&user_id)?;
    let lines = cart_lines(req.items)?;

    let cart = state.store.replace_cart(user_id, lines).await?;
    Ok(Json(cart.into()))
}

/// GET /carts/:user_id: read the user's cart; unknown users have an empty one.
#[tracing::instrument(skip(state))]
pub async fn get<S, D>(
    State(state): State<Arc<AppState<S, D>>>,
    Path(user_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError>
where
    S: OrderStore + 'static,
    D: EventDeduplicator + 'static,
{
    let user_id = parse_user_id(&user_id)?;

    let response = match state.store.get_cart(user_id).await? {
        Some(cart) => cart.into(),
        None => CartResponse {
            user_id: user_id.to_string(),
            items: Vec::new(),
            updated_at: None,
        },
    };
    Ok(Json(response))
}

/// Converts request items to cart lines, rejecting empty ids and zero quantities.
pub(crate) fn cart_lines(items: Vec<CartItemRequest>) -> Result<Vec<CartLine>, ApiError> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            if item.catalog_id.trim().is_empty() {
                return Err(ApiError::BadRequest(format!(
                    "items[{i}].catalog_id must not be empty"
                )));
            }
            if item.quantity == 0 {
                return Err(ApiError::BadRequest(format!(
                    "items[{i}].quantity must be greater than zero"
                )));
            }
            Ok(CartLine::new(item.catalog_id, item.quantity))
        })
        .collect()
}

pub(crate) fn parse_user_id(s: &str) -> Result<UserId, ApiError> {
    UserId::parse(s).ok_or_else(|| ApiError::BadRequest(format!("Invalid user id: {s}")))
}
