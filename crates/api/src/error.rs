//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use fulfillment::{FulfillmentError, WebhookError};
use order_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Checkout could not start.
    Checkout(CheckoutError),
    /// A payment notification could not be fulfilled.
    Fulfillment(FulfillmentError),
    /// Order store failure.
    Store(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, message(msg)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, message(msg)),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Fulfillment(err) => fulfillment_error_to_response(err),
            ApiError::Store(err) => store_error_to_response(err),
        };

        (status, axum::Json(body)).into_response()
    }
}

fn message(msg: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": msg.into() })
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, serde_json::Value) {
    match &err {
        CheckoutError::Validation(v) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": v.to_string(),
                "field": v.field(),
                "code": v.code(),
            }),
        ),
        CheckoutError::EmptyCart => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": err.to_string(), "field": "items", "code": "empty_cart" }),
        ),
        CheckoutError::CatalogUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, message(err.to_string()))
        }
        CheckoutError::PaymentProvider(_) => {
            tracing::error!(error = %err, "payment session creation failed");
            (StatusCode::BAD_GATEWAY, message(err.to_string()))
        }
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, serde_json::Value) {
    let status = match &err {
        StoreError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
        _ => {
            tracing::error!(error = %err, "order store error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, message(err.to_string()))
}

fn fulfillment_error_to_response(err: FulfillmentError) -> (StatusCode, serde_json::Value) {
    let status = match &err {
        FulfillmentError::Webhook(WebhookError::InvalidSignature(_)) => StatusCode::UNAUTHORIZED,
        FulfillmentError::Webhook(WebhookError::MalformedPayload(_)) => StatusCode::BAD_REQUEST,
        FulfillmentError::MetadataCorrupt(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FulfillmentError::Storage(_) | FulfillmentError::Provider(_) | FulfillmentError::Dedup(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, message(err.to_string()))
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}
