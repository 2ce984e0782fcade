//! Event deduplication: exclusive, TTL-bounded processing claims.

mod memory;
mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::InMemoryDeduplicator;
pub use postgres::PostgresDeduplicator;

/// Identifies the run holding a claim.
///
/// Only the holder's token can complete or release a claim, so a run whose
/// claim expired and was taken over cannot disturb the new holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimToken(Uuid);

impl ClaimToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of trying to claim an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller now owns processing of the event.
    Acquired(ClaimToken),
    /// Another run holds or has finished the event.
    AlreadyProcessed,
}

impl ClaimOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, ClaimOutcome::Acquired(_))
    }

    /// The holder's token, if the claim was won.
    pub fn token(&self) -> Option<ClaimToken> {
        match self {
            ClaimOutcome::Acquired(token) => Some(*token),
            ClaimOutcome::AlreadyProcessed => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// How long claims live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPolicy {
    /// Lifetime of an in-flight claim. A run that crashes without completing
    /// or releasing its claim is retried after this expires.
    pub claim_ttl: Duration,
    /// How long a completed event is remembered.
    pub retention_ttl: Duration,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            claim_ttl: Duration::from_secs(300),
            retention_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Atomic compare-and-set over event ids.
#[async_trait]
pub trait EventDeduplicator: Send + Sync {
    /// Claims `event_id` unless a live claim or completion already exists.
    async fn claim(&self, event_id: &str) -> Result<ClaimOutcome, DedupError>;

    /// Marks the event done; it stays claimed for the retention period.
    ///
    /// Applies when `token` holds the claim or no claim is stored. Returns
    /// false if another run has taken the claim over.
    async fn complete(&self, event_id: &str, token: ClaimToken) -> Result<bool, DedupError>;

    /// Drops the in-flight claim held by `token` so the next delivery can
    /// proceed at once. Returns false if `token` no longer holds it.
    async fn release(&self, event_id: &str, token: ClaimToken) -> Result<bool, DedupError>;

    /// Forgets claims whose lifetime has passed. Returns how many were dropped.
    async fn purge_expired(&self) -> Result<u64, DedupError>;
}
