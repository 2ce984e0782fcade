use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ClaimOutcome, ClaimToken, DedupError, DedupPolicy, EventDeduplicator};

/// Claims stored in the `webhook_claims` table, shared by every instance.
#[derive(Clone)]
pub struct PostgresDeduplicator {
    pool: PgPool,
    policy: DedupPolicy,
}

impl PostgresDeduplicator {
    pub fn new(pool: PgPool, policy: DedupPolicy) -> Self {
        Self { pool, policy }
    }
}

#[async_trait]
impl EventDeduplicator for PostgresDeduplicator {
    #[tracing::instrument(skip(self))]
    async fn claim(&self, event_id: &str) -> Result<ClaimOutcome, DedupError> {
        // The conflict branch only fires for an expired row, so the row
        // comes back exactly when this caller won the claim.
        let won: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO webhook_claims (event_id, status, token, expires_at, updated_at)
            VALUES ($1, 'processing', $2, NOW() + make_interval(secs => $3), NOW())
            ON CONFLICT (event_id) DO UPDATE SET
                status = 'processing',
                token = EXCLUDED.token,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            WHERE webhook_claims.expires_at < NOW()
            RETURNING token
            "#,
        )
        .bind(event_id)
        .bind(ClaimToken::new().as_uuid())
        .bind(self.policy.claim_ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match won {
            Some(token) => ClaimOutcome::Acquired(ClaimToken::from_uuid(token)),
            None => ClaimOutcome::AlreadyProcessed,
        })
    }

    async fn complete(&self, event_id: &str, token: ClaimToken) -> Result<bool, DedupError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_claims (event_id, status, token, expires_at, updated_at)
            VALUES ($1, 'completed', $2, NOW() + make_interval(secs => $3), NOW())
            ON CONFLICT (event_id) DO UPDATE SET
                status = 'completed',
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            WHERE webhook_claims.token = EXCLUDED.token
            "#,
        )
        .bind(event_id)
        .bind(token.as_uuid())
        .bind(self.policy.retention_ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, event_id: &str, token: ClaimToken) -> Result<bool, DedupError> {
        let result = sqlx::query(
            "DELETE FROM webhook_claims WHERE event_id = $1 AND token = $2 AND status = 'processing'",
        )
        .bind(event_id)
        .bind(token.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> Result<u64, DedupError> {
        let result = sqlx::query("DELETE FROM webhook_claims WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
