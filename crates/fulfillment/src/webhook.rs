//! Payment webhook authentication and parsing.
//!
//! Signatures use the timestamped HMAC-SHA256 scheme: the provider sends
//! `t=<unix>,v1=<hex>[,v1=<hex>...]` and signs `"{t}.{raw_body}"` with the
//! shared secret. Several `v1` entries may be present during secret rotation.

use std::collections::BTreeMap;
use std::time::Duration;

use common::Money;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_INTENT_FAILED: &str = "payment_intent.payment_failed";

/// Maximum clock skew accepted between signing and verification.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Verification failures. Neither is ever retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

/// An authenticated payment notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_id: String,
    pub event_type: String,
    pub session_id: String,
    pub amount_total: Option<Money>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub payment_intent: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl PaymentEvent {
    pub fn is_checkout_completed(&self) -> bool {
        self.event_type == CHECKOUT_SESSION_COMPLETED
    }
}

#[derive(Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData {
    object: EventObject,
}

#[derive(Deserialize)]
struct EventObject {
    id: String,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    payment_intent: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Authenticates raw webhook bodies and parses them into [`PaymentEvent`]s.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Verifies against the current wall clock.
    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Result<PaymentEvent, WebhookError> {
        self.verify_at(body, header, chrono::Utc::now().timestamp())
    }

    /// Verifies as if the current time were `now` (unix seconds).
    pub fn verify_at(
        &self,
        body: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<PaymentEvent, WebhookError> {
        let header = header
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| WebhookError::InvalidSignature("missing signature header".into()))?;
        let (timestamp, signatures) = parse_header(header)?;

        let tolerance = i64::try_from(self.tolerance.as_secs()).unwrap_or(i64::MAX);
        if now.saturating_sub(timestamp).abs() > tolerance {
            return Err(WebhookError::InvalidSignature(
                "timestamp outside tolerance".into(),
            ));
        }

        let mac = self.mac_for(timestamp, body)?;
        // verify_slice compares in constant time.
        let matched = signatures
            .iter()
            .filter_map(|s| hex::decode(s).ok())
            .any(|sig| mac.clone().verify_slice(&sig).is_ok());
        if !matched {
            return Err(WebhookError::InvalidSignature("signature mismatch".into()));
        }

        parse_event(body)
    }

    fn mac_for(&self, timestamp: i64, body: &[u8]) -> Result<HmacSha256, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| WebhookError::InvalidSignature("unusable secret".into()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }
}

/// Builds a valid signature header for `body`, as the provider would send it.
pub fn signature_header(secret: &str, body: &[u8], timestamp: i64) -> String {
    let signature = WebhookVerifier::new(secret)
        .mac_for(timestamp, body)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default();
    format!("t={timestamp},v1={signature}")
}

fn parse_header(header: &str) -> Result<(i64, Vec<&str>), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    WebhookError::InvalidSignature("unparsable timestamp".into())
                })?)
            }
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| WebhookError::InvalidSignature("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(WebhookError::InvalidSignature(
            "missing v1 signature".into(),
        ));
    }
    Ok((timestamp, signatures))
}

fn parse_event(body: &[u8]) -> Result<PaymentEvent, WebhookError> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
    if envelope.id.is_empty() || envelope.event_type.is_empty() || envelope.data.object.id.is_empty()
    {
        return Err(WebhookError::MalformedPayload(
            "event id, type and object id are required".into(),
        ));
    }

    let object = envelope.data.object;
    let (details_email, customer_name) = match object.customer_details {
        Some(d) => (d.email, d.name),
        None => (None, None),
    };
    let payment_intent = match object.payment_intent {
        Some(serde_json::Value::String(id)) => Some(id),
        Some(serde_json::Value::Object(obj)) => obj
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    };

    Ok(PaymentEvent {
        event_id: envelope.id,
        event_type: envelope.event_type,
        session_id: object.id,
        amount_total: object.amount_total.map(Money::from_minor),
        currency: object.currency,
        customer_email: details_email.or(object.customer_email),
        customer_name,
        payment_intent,
        metadata: object.metadata.unwrap_or_default(),
    })
}
