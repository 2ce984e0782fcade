//! Prometheus metrics endpoint and metric descriptions.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusHandle;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Registers help text for the metrics the service emits.
pub fn describe() {
    describe_counter!(
        "checkout_sessions_created_total",
        "Payment sessions opened after a successful cart validation"
    );
    describe_counter!(
        "checkout_validation_failures_total",
        "Checkout attempts rejected by cart validation, by code"
    );
    describe_counter!(
        "webhook_rejected_total",
        "Payment notifications that failed signature or payload checks"
    );
    describe_counter!(
        "fulfillment_runs_total",
        "Fulfillment runs by outcome"
    );
    describe_counter!(
        "fulfillment_failed_total",
        "Fulfillment runs that failed before commit, by reason"
    );
    describe_counter!(
        "fulfillment_duplicates_total",
        "Duplicate deliveries caught at the claim or order stage"
    );
    describe_counter!(
        "fulfillment_effects_unconfirmed_total",
        "Orders found after a timed-out commit whose post-commit effects never ran"
    );
    describe_counter!(
        "fulfillment_side_effect_failures_total",
        "Post-commit effects that exhausted their retries"
    );
    describe_histogram!(
        "fulfillment_duration_seconds",
        "Wall time of a fulfillment run"
    );
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        handle.render(),
    )
}
