use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{ClaimOutcome, ClaimToken, DedupError, DedupPolicy, EventDeduplicator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimStatus {
    InFlight,
    Completed,
}

#[derive(Debug, Clone, Copy)]
struct Claim {
    status: ClaimStatus,
    token: ClaimToken,
    expires_at: Instant,
}

/// Mutex-guarded claim map for tests and single-instance deployments.
///
/// Expired entries stay in the map until [`purge_expired`](EventDeduplicator::purge_expired)
/// runs; the server calls it periodically.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeduplicator {
    claims: Arc<Mutex<HashMap<String, Claim>>>,
    policy: DedupPolicy,
}

impl InMemoryDeduplicator {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            claims: Arc::default(),
            policy,
        }
    }

    /// Forgets every claim, as after a cache flush or restart.
    pub async fn clear(&self) {
        self.claims.lock().await.clear();
    }

    /// Number of live claims, in flight or completed.
    pub async fn live_claims(&self) -> usize {
        let now = Instant::now();
        self.claims
            .lock()
            .await
            .values()
            .filter(|c| c.expires_at > now)
            .count()
    }

    /// Number of stored entries, expired ones included.
    pub async fn stored_claims(&self) -> usize {
        self.claims.lock().await.len()
    }
}

#[async_trait]
impl EventDeduplicator for InMemoryDeduplicator {
    async fn claim(&self, event_id: &str) -> Result<ClaimOutcome, DedupError> {
        let now = Instant::now();
        let mut claims = self.claims.lock().await;

        if let Some(existing) = claims.get(event_id)
            && existing.expires_at > now
        {
            return Ok(ClaimOutcome::AlreadyProcessed);
        }

        let token = ClaimToken::new();
        claims.insert(
            event_id.to_string(),
            Claim {
                status: ClaimStatus::InFlight,
                token,
                expires_at: now + self.policy.claim_ttl,
            },
        );
        Ok(ClaimOutcome::Acquired(token))
    }

    async fn complete(&self, event_id: &str, token: ClaimToken) -> Result<bool, DedupError> {
        let mut claims = self.claims.lock().await;
        if claims.get(event_id).is_some_and(|c| c.token != token) {
            return Ok(false);
        }

        claims.insert(
            event_id.to_string(),
            Claim {
                status: ClaimStatus::Completed,
                token,
                expires_at: Instant::now() + self.policy.retention_ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, event_id: &str, token: ClaimToken) -> Result<bool, DedupError> {
        let mut claims = self.claims.lock().await;
        let held = claims
            .get(event_id)
            .is_some_and(|c| c.status == ClaimStatus::InFlight && c.token == token);
        if held {
            claims.remove(event_id);
        }
        Ok(held)
    }

    async fn purge_expired(&self) -> Result<u64, DedupError> {
        let now = Instant::now();
        let mut claims = self.claims.lock().await;
        let before = claims.len();
        claims.retain(|_, c| c.expires_at > now);
        Ok((before - claims.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn dedup() -> InMemoryDeduplicator {
        InMemoryDeduplicator::new(DedupPolicy {
            claim_ttl: Duration::from_secs(30),
            retention_ttl: Duration::from_secs(3600),
        })
    }

    async fn acquire(dedup: &InMemoryDeduplicator, event_id: &str) -> ClaimToken {
        dedup
            .claim(event_id)
            .await
            .unwrap()
            .token()
            .expect("claim should be acquired")
    }

    #[tokio::test]
    async fn second_claim_is_already_processed() {
        let dedup = dedup();
        assert!(dedup.claim("evt_1").await.unwrap().is_acquired());
        assert_eq!(
            dedup.claim("evt_1").await.unwrap(),
            ClaimOutcome::AlreadyProcessed
        );
        assert!(dedup.claim("evt_2").await.unwrap().is_acquired());
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let dedup = dedup();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let dedup = dedup.clone();
            handles.push(tokio::spawn(async move { dedup.claim("evt_race").await }));
        }

        let mut acquired = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_acquired() {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1);
    }

    #[tokio::test]
    async fn release_reopens_in_flight_claim() {
        let dedup = dedup();
        let token = acquire(&dedup, "evt_1").await;
        assert!(dedup.release("evt_1", token).await.unwrap());
        assert!(dedup.claim("evt_1").await.unwrap().is_acquired());
    }

    #[tokio::test]
    async fn release_does_not_reopen_completed_event() {
        let dedup = dedup();
        let token = acquire(&dedup, "evt_1").await;
        assert!(dedup.complete("evt_1", token).await.unwrap());
        assert!(!dedup.release("evt_1", token).await.unwrap());
        assert_eq!(
            dedup.claim("evt_1").await.unwrap(),
            ClaimOutcome::AlreadyProcessed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_claim_expires() {
        let dedup = dedup();
        dedup.claim("evt_1").await.unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(
            dedup.claim("evt_1").await.unwrap(),
            ClaimOutcome::AlreadyProcessed
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(dedup.claim("evt_1").await.unwrap().is_acquired());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_holder_cannot_release_taken_over_claim() {
        let dedup = dedup();
        let first = acquire(&dedup, "evt_1").await;

        tokio::time::advance(Duration::from_secs(31)).await;
        let second = acquire(&dedup, "evt_1").await;
        assert_ne!(first, second);

        assert!(!dedup.release("evt_1", first).await.unwrap());
        assert_eq!(
            dedup.claim("evt_1").await.unwrap(),
            ClaimOutcome::AlreadyProcessed
        );

        assert!(dedup.release("evt_1", second).await.unwrap());
        assert!(dedup.claim("evt_1").await.unwrap().is_acquired());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_holder_cannot_complete_taken_over_claim() {
        let dedup = dedup();
        let first = acquire(&dedup, "evt_1").await;

        tokio::time::advance(Duration::from_secs(31)).await;
        let second = acquire(&dedup, "evt_1").await;

        assert!(!dedup.complete("evt_1", first).await.unwrap());
        // The new holder can still hand the event back for redelivery.
        assert!(dedup.release("evt_1", second).await.unwrap());
    }

    #[tokio::test]
    async fn complete_without_stored_claim_records_completion() {
        let dedup = dedup();
        let token = acquire(&dedup, "evt_1").await;
        dedup.clear().await;

        assert!(dedup.complete("evt_1", token).await.unwrap());
        assert_eq!(
            dedup.claim("evt_1").await.unwrap(),
            ClaimOutcome::AlreadyProcessed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completed_event_outlives_claim_ttl() {
        let dedup = dedup();
        let token = acquire(&dedup, "evt_1").await;
        dedup.complete("evt_1", token).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(
            dedup.claim("evt_1").await.unwrap(),
            ClaimOutcome::AlreadyProcessed
        );
        assert_eq!(dedup.live_claims().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let dedup = InMemoryDeduplicator::new(DedupPolicy {
            claim_ttl: Duration::from_secs(30),
            retention_ttl: Duration::from_secs(1),
        });
        for i in 0..1000 {
            let event_id = format!("evt_{i}");
            let token = acquire(&dedup, &event_id).await;
            dedup.complete(&event_id, token).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        acquire(&dedup, "evt_live").await;

        assert_eq!(dedup.stored_claims().await, 1001);
        assert_eq!(dedup.purge_expired().await.unwrap(), 1000);
        assert_eq!(dedup.stored_claims().await, 1);
        assert_eq!(dedup.live_claims().await, 1);
    }

    #[tokio::test]
    async fn clear_forgets_everything() {
        let dedup = dedup();
        let token = acquire(&dedup, "evt_1").await;
        dedup.complete("evt_1", token).await.unwrap();
        dedup.clear().await;
        assert!(dedup.claim("evt_1").await.unwrap().is_acquired());
    }
}
