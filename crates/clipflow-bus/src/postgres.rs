//! Postgres-backed work bus.
//!
//! Messages live in a `jobs` table; `claim` takes the next pending row with
//! `FOR UPDATE SKIP LOCKED` so parallel consumers across processes never
//! double-claim. A crashed consumer's `running` rows are returned to
//! `pending` by [`PgWorkBus::requeue_stale`], driven from the worker runner.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use clipflow_core::models::job::Priority;
use clipflow_core::{AppError, AppResult};

use crate::traits::{Delivery, WorkBus};

/// Create the jobs table, idempotently. Run at boot.
pub async fn ensure_bus_schema(pool: &PgPool) -> AppResult<()> {
    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            queue TEXT NOT NULL,
            envelope JSONB NOT NULL,
            priority INTEGER NOT NULL DEFAULT 5,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            claimed_at TIMESTAMPTZ
        );
        CREATE INDEX IF NOT EXISTS jobs_claim_idx
            ON jobs (queue, status, priority DESC, created_at ASC);
        "#,
    )
    .execute(pool)
    .await
    .map_err(bus_err)?;
    Ok(())
}

fn bus_err(err: sqlx::Error) -> AppError {
    AppError::transient("work bus error", err)
}

#[derive(Clone)]
pub struct PgWorkBus {
    pool: PgPool,
}

impl PgWorkBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Return `running` rows claimed longer than `max_age` ago to `pending`.
    pub async fn requeue_stale(&self, max_age: std::time::Duration) -> AppResult<u64> {
        let cutoff = Utc::now() - Duration::from_std(max_age).unwrap_or(Duration::hours(1));
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', claimed_at = NULL \
             WHERE status = 'running' AND claimed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(bus_err)?;

        if result.rows_affected() > 0 {
            tracing::warn!(
                requeued = result.rows_affected(),
                "Returned stale in-flight jobs to their queues"
            );
        }
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl WorkBus for PgWorkBus {
    async fn publish(
        &self,
        queue: &str,
        envelope: serde_json::Value,
        priority: Priority,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO jobs (id, queue, envelope, priority, status) \
             VALUES ($1, $2, $3, $4, 'pending')",
        )
        .bind(Uuid::new_v4())
        .bind(queue)
        .bind(envelope)
        .bind(priority.as_i32())
        .execute(&self.pool)
        .await
        .map_err(bus_err)?;

        tracing::debug!(queue = %queue, "Published job");
        Ok(())
    }

    async fn claim(&self, queues: &[&str]) -> AppResult<Option<Delivery>> {
        let queue_names: Vec<String> = queues.iter().map(|q| q.to_string()).collect();
        let row = sqlx::query(
            r#"
            UPDATE jobs SET status = 'running', claimed_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ANY($1) AND status = 'pending'
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, queue, envelope
            "#,
        )
        .bind(&queue_names)
        .fetch_optional(&self.pool)
        .await
        .map_err(bus_err)?;

        Ok(row.map(|row| Delivery {
            id: row.get("id"),
            queue: row.get("queue"),
            envelope: row.get("envelope"),
        }))
    }

    async fn ack(&self, delivery_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(delivery_id)
            .execute(&self.pool)
            .await
            .map_err(bus_err)?;
        Ok(())
    }

    async fn nack(&self, delivery_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE jobs SET status = 'pending', claimed_at = NULL WHERE id = $1")
            .bind(delivery_id)
            .execute(&self.pool)
            .await
            .map_err(bus_err)?;
        Ok(())
    }

    async fn depth(&self, queue: &str) -> AppResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE queue = $1 AND status = 'pending'")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(bus_err)?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }
}
