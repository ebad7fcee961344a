//! `PgBroker`: claim/ack implemented as `SELECT ... FOR UPDATE SKIP LOCKED`
//! against `scrape_jobs`, the pattern already used by the originating
//! codebase's job queue, with `locked_at` standing in for "active set"
//! membership and `execute_at` driving delayed redelivery.

use super::{Broker, validate_term};
use crate::error::EngineError;
use crate::models::{Priority, ScrapeJob};
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

/// Safety net for crashed workers: a claim older than this is treated as
/// abandoned and re-claimable, mirroring the originating codebase's
/// `LOCK_EXPIRY`.
const LOCK_EXPIRY_MINUTES: i64 = 10;

pub struct PgBroker {
    pool: PgPool,
}

impl PgBroker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn enqueue(&self, term: &str, year: i32, priority: Priority) -> Result<i64, EngineError> {
        validate_term(term)?;

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO scrape_jobs (
                search_term, year, status, progress, result_count, attempts,
                priority, execute_at, created_at
            )
            VALUES ($1, $2, 'pending', 0, 0, 0, $3, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(term)
        .bind(year)
        .bind(priority.0)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EngineError::StoreError(e.to_string()))?;

        Ok(id)
    }

    async fn claim(&self) -> Result<Option<ScrapeJob>, EngineError> {
        sqlx::query_as::<_, ScrapeJob>(&format!(
            r#"
            WITH claimed AS (
                SELECT id FROM scrape_jobs
                WHERE status = 'pending'
                  AND execute_at <= NOW()
                  AND (locked_at IS NULL OR locked_at < NOW() - INTERVAL '{LOCK_EXPIRY_MINUTES} minutes')
                ORDER BY priority ASC, execute_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE scrape_jobs
            SET locked_at = NOW(), status = 'processing', started_at = NOW(), progress = 10
            WHERE id IN (SELECT id FROM claimed)
            RETURNING *
            "#
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::StoreError(e.to_string()))
    }

    async fn set_progress(&self, id: i64, progress: i32) -> Result<(), EngineError> {
        sqlx::query("UPDATE scrape_jobs SET progress = $2 WHERE id = $1")
            .bind(id)
            .bind(progress)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::StoreError(e.to_string()))?;
        Ok(())
    }

    async fn complete(&self, id: i64, result_count: i32) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET status = 'completed', progress = 100, result_count = $2,
                completed_at = NOW(), locked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result_count)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::StoreError(e.to_string()))?;
        Ok(())
    }

    async fn retry_or_fail(
        &self,
        id: i64,
        max_attempts: u32,
        backoff_base: Duration,
        error: &str,
    ) -> Result<bool, EngineError> {
        // Single atomic UPDATE...RETURNING, so attempts-increment and the
        // retry/fail decision never race another worker's claim. Jitter
        // (+/-25%) and the exponential factor are computed in SQL via
        // random() so the whole decision stays one round trip.
        let (status,): (String,) = sqlx::query_as(
            r#"
            UPDATE scrape_jobs
            SET
                attempts = attempts + 1,
                locked_at = NULL,
                error = $4,
                status = CASE WHEN attempts + 1 >= $3 THEN 'failed' ELSE 'pending' END,
                completed_at = CASE WHEN attempts + 1 >= $3 THEN NOW() ELSE completed_at END,
                execute_at = CASE WHEN attempts + 1 >= $3 THEN execute_at
                    ELSE NOW() + make_interval(secs =>
                        $2 * power(2, attempts) * (0.75 + random() * 0.5))
                END
            WHERE id = $1
            RETURNING status::text
            "#,
        )
        .bind(id)
        .bind(backoff_base.as_secs_f64())
        .bind(max_attempts as i32)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EngineError::StoreError(e.to_string()))?;

        Ok(status == "pending")
    }

    async fn is_active(&self, term: &str) -> Result<bool, EngineError> {
        let (active,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM scrape_jobs WHERE search_term = $1 AND locked_at IS NOT NULL)",
        )
        .bind(term)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EngineError::StoreError(e.to_string()))?;

        Ok(active)
    }

    async fn force_unlock_all(&self) -> Result<u64, EngineError> {
        let result = sqlx::query("UPDATE scrape_jobs SET locked_at = NULL WHERE locked_at IS NOT NULL")
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::StoreError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
