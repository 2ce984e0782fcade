//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use fulfillment::EventDeduplicator;
use order_store::OrderStore;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub orders: Option<usize>,
}

/// GET /health: reports whether the order store answers.
pub async fn check<S, D>(
    State(state): State<Arc<AppState<S, D>>>,
) -> (StatusCode, Json<HealthResponse>)
where
    S: OrderStore + 'static,
    D: EventDeduplicator + 'static,
{
    match state.store.order_count().await {
        Ok(count) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                orders: Some(count),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: order store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    orders: None,
                }),
            )
        }
    }
}
