//! Webhook delivery model.
//!
//! Tracks one notification of one event to one subscription across all of its
//! attempts. Rows in a terminal status (`delivered`, `failed`) are never
//! updated again: every write below is guarded on a non-terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A webhook delivery record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDeliveryRow {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub tenant_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    /// Serialized request body, sent byte-for-byte on every attempt.
    pub payload_json: String,
    pub target_url: String,
    /// One of: pending, retrying, delivered, failed.
    pub status: String,
    pub attempt_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub response_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: Option<i32>,
    /// Set while a scheduler worker holds the row.
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookDeliveryRow {
    /// Insert a new delivery.
    pub async fn insert(pool: &PgPool, row: &Self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO webhook_deliveries
                (id, subscription_id, tenant_id, event_id, event_type, payload_json,
                 target_url, status, attempt_count, next_retry_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(row.id)
        .bind(row.subscription_id)
        .bind(row.tenant_id)
        .bind(row.event_id)
        .bind(&row.event_type)
        .bind(&row.payload_json)
        .bind(&row.target_url)
        .bind(&row.status)
        .bind(row.attempt_count)
        .bind(row.next_retry_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a delivery by ID within a tenant.
    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_deliveries
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// List deliveries for a subscription, newest first.
    pub async fn list_by_subscription(
        pool: &PgPool,
        tenant_id: Uuid,
        subscription_id: Uuid,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_deliveries
            WHERE tenant_id = $1
              AND subscription_id = $2
              AND ($3::VARCHAR IS NULL OR status = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            ",
        )
        .bind(tenant_id)
        .bind(subscription_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    /// Count deliveries for a subscription.
    pub async fn count_by_subscription(
        pool: &PgPool,
        tenant_id: Uuid,
        subscription_id: Uuid,
        status: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM webhook_deliveries
            WHERE tenant_id = $1
              AND subscription_id = $2
              AND ($3::VARCHAR IS NULL OR status = $3)
            ",
        )
        .bind(tenant_id)
        .bind(subscription_id)
        .bind(status)
        .fetch_one(pool)
        .await
    }

    /// Atomically claim due deliveries across all tenants.
    ///
    /// A row is due when it is `pending`, or `retrying` with `next_retry_at <= now`,
    /// and no unexpired claim is held on it. `SKIP LOCKED` keeps concurrent
    /// schedulers from blocking on, or double-claiming, the same rows.
    pub async fn claim_due(
        pool: &PgPool,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhook_deliveries
            SET claimed_until = $2, updated_at = $1
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE (status = 'pending'
                       OR (status = 'retrying' AND next_retry_at <= $1))
                  AND (claimed_until IS NULL OR claimed_until <= $1)
                ORDER BY created_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            ",
        )
        .bind(now)
        .bind(claim_until)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Persist the outcome of an attempt and drop the claim.
    ///
    /// Applies only if the stored row is still non-terminal and its attempt
    /// count equals `expected_attempt_count`. Returns false otherwise.
    pub async fn complete_attempt(
        pool: &PgPool,
        row: &Self,
        expected_attempt_count: i32,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = $3,
                attempt_count = $4,
                next_retry_at = $5,
                delivered_at = $6,
                failed_at = $7,
                response_status_code = $8,
                response_body = $9,
                error_message = $10,
                latency_ms = $11,
                claimed_until = NULL,
                updated_at = $12
            WHERE id = $1
              AND tenant_id = $2
              AND status IN ('pending', 'retrying')
              AND attempt_count = $13
            ",
        )
        .bind(row.id)
        .bind(row.tenant_id)
        .bind(&row.status)
        .bind(row.attempt_count)
        .bind(row.next_retry_at)
        .bind(row.delivered_at)
        .bind(row.failed_at)
        .bind(row.response_status_code)
        .bind(&row.response_body)
        .bind(&row.error_message)
        .bind(row.latency_ms)
        .bind(row.updated_at)
        .bind(expected_attempt_count)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Extend a claim, provided the row still carries the claim `held_until`.
    pub async fn renew_claim(
        pool: &PgPool,
        id: Uuid,
        held_until: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET claimed_until = $3
            WHERE id = $1
              AND claimed_until = $2
              AND status IN ('pending', 'retrying')
            ",
        )
        .bind(id)
        .bind(held_until)
        .bind(claim_until)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Drop a claim without touching attempt state.
    pub async fn release(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET claimed_until = NULL
            WHERE id = $1 AND status IN ('pending', 'retrying')
            ",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
