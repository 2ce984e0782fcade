//! Payment provider webhook endpoint.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use fulfillment::{
    EventDeduplicator, FulfillmentOutcome, PartialFulfillmentWarning, SIGNATURE_HEADER,
};
use order_store::OrderStore;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: &'static str,
    pub order_number: Option<String>,
    pub warnings: Vec<PartialFulfillmentWarning>,
}

impl From<FulfillmentOutcome> for WebhookResponse {
    fn from(outcome: FulfillmentOutcome) -> Self {
        let label = outcome.as_str();
        let (order_number, warnings) = match outcome {
            FulfillmentOutcome::Fulfilled(report) => (Some(report.order_number), report.warnings),
            FulfillmentOutcome::AlreadyFulfilled { order_number } => {
                (Some(order_number), Vec::new())
            }
            _ => (None, Vec::new()),
        };
        Self {
            received: true,
            outcome: label,
            order_number,
            warnings,
        }
    }
}

/// POST /webhooks/payment: verify and fulfill a payment notification.
///
/// The body is taken raw because the signature covers the exact bytes.
#[tracing::instrument(skip(state, headers, body), fields(body_len = body.len()))]
pub async fn payment<S, D>(
    State(state): State<Arc<AppState<S, D>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError>
where
    S: OrderStore + 'static,
    D: EventDeduplicator + 'static,
{
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state.orchestrator.handle_webhook(&body, signature).await?;
    Ok(Json(outcome.into()))
}
