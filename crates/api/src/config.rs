//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::CheckoutSettings;
use fulfillment::{DedupPolicy, EffectPolicy, FulfillmentSettings};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default: `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: enables the Postgres order store and claim table
/// - `CATALOG_FILE`: JSON list of products to seed the catalog with
/// - `WEBHOOK_SECRET`, `WEBHOOK_TOLERANCE_SECS`: webhook signature check
/// - `DEDUP_CLAIM_TTL_SECS`, `DEDUP_RETENTION_SECS`: claim lifetimes
/// - `EFFECT_TIMEOUT_MS`, `EFFECT_MAX_ATTEMPTS`: post-commit effect budget
/// - `UPSTREAM_TIMEOUT_MS`: catalog, provider and commit timeout
/// - `CHECKOUT_CURRENCY`, `CHECKOUT_SUCCESS_URL`, `CHECKOUT_CANCEL_URL`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub catalog_file: Option<String>,
    pub webhook_secret: String,
    pub webhook_tolerance: Duration,
    pub dedup_claim_ttl: Duration,
    pub dedup_retention: Duration,
    pub effect_timeout: Duration,
    pub effect_max_attempts: u32,
    pub upstream_timeout: Duration,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Secret used when `WEBHOOK_SECRET` is unset. Only for local runs.
pub const DEV_WEBHOOK_SECRET: &str = "whsec_dev_only";

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|u| !u.is_empty()),
            catalog_file: lookup("CATALOG_FILE").filter(|f| !f.is_empty()),
            webhook_secret: lookup("WEBHOOK_SECRET")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.webhook_secret),
            webhook_tolerance: parsed("WEBHOOK_TOLERANCE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.webhook_tolerance),
            dedup_claim_ttl: parsed("DEDUP_CLAIM_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_claim_ttl),
            dedup_retention: parsed("DEDUP_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_retention),
            effect_timeout: parsed("EFFECT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.effect_timeout),
            effect_max_attempts: parsed("EFFECT_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.effect_max_attempts),
            upstream_timeout: parsed("UPSTREAM_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.upstream_timeout),
            currency: lookup("CHECKOUT_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or(defaults.currency),
            success_url: lookup("CHECKOUT_SUCCESS_URL").unwrap_or(defaults.success_url),
            cancel_url: lookup("CHECKOUT_CANCEL_URL").unwrap_or(defaults.cancel_url),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.webhook_secret == DEV_WEBHOOK_SECRET
    }

    pub fn checkout_settings(&self) -> CheckoutSettings {
        CheckoutSettings {
            currency: self.currency.clone(),
            success_url: self.success_url.clone(),
            cancel_url: self.cancel_url.clone(),
        }
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        DedupPolicy {
            claim_ttl: self.dedup_claim_ttl,
            retention_ttl: self.dedup_retention,
        }
    }

    pub fn fulfillment_settings(&self) -> FulfillmentSettings {
        FulfillmentSettings {
            effect_policy: EffectPolicy {
                timeout: self.effect_timeout,
                max_attempts: self.effect_max_attempts,
                ..EffectPolicy::default()
            },
            upstream_timeout: self.upstream_timeout,
            default_currency: self.currency.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let checkout = CheckoutSettings::default();
        let dedup = DedupPolicy::default();
        let effects = EffectPolicy::default();

        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            catalog_file: None,
            webhook_secret: DEV_WEBHOOK_SECRET.to_string(),
            webhook_tolerance: fulfillment::webhook::DEFAULT_TOLERANCE,
            dedup_claim_ttl: dedup.claim_ttl,
            dedup_retention: dedup.retention_ttl,
            effect_timeout: effects.timeout,
            effect_max_attempts: effects.max_attempts,
            upstream_timeout: Duration::from_secs(10),
            currency: checkout.currency,
            success_url: checkout.success_url,
            cancel_url: checkout.cancel_url,
        }
    }
}
