//! Webhook subscription model.
//!
//! One row per registered receiver endpoint. The signing secret is stored
//! encrypted; this crate never sees the plaintext.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A webhook subscription record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookSubscriptionRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub target_url: String,
    /// AES-256-GCM ciphertext, base64 encoded.
    pub secret_encrypted: String,
    /// Event tags in their dotted wire form.
    pub subscribed_events: Vec<String>,
    pub is_active: bool,
    pub max_retries: i32,
    pub retry_delay_seconds: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscriptionRow {
    /// Insert a new subscription.
    pub async fn insert(pool: &PgPool, row: &Self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO webhook_subscriptions
                (id, tenant_id, name, description, target_url, secret_encrypted,
                 subscribed_events, is_active, max_retries, retry_delay_seconds,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(row.id)
        .bind(row.tenant_id)
        .bind(&row.name)
        .bind(&row.description)
        .bind(&row.target_url)
        .bind(&row.secret_encrypted)
        .bind(&row.subscribed_events)
        .bind(row.is_active)
        .bind(row.max_retries)
        .bind(row.retry_delay_seconds)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a subscription by ID within a tenant.
    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_subscriptions
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Find active subscriptions of a tenant that include `event_type`.
    pub async fn find_active_by_event_type(
        pool: &PgPool,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_subscriptions
            WHERE tenant_id = $1
              AND is_active = TRUE
              AND $2 = ANY(subscribed_events)
            ORDER BY created_at
            ",
        )
        .bind(tenant_id)
        .bind(event_type)
        .fetch_all(pool)
        .await
    }

    /// List subscriptions for a tenant, newest first.
    pub async fn list_by_tenant(
        pool: &PgPool,
        tenant_id: Uuid,
        is_active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_subscriptions
            WHERE tenant_id = $1
              AND ($2::BOOLEAN IS NULL OR is_active = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            ",
        )
        .bind(tenant_id)
        .bind(is_active)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    /// Count subscriptions for a tenant.
    pub async fn count_by_tenant(
        pool: &PgPool,
        tenant_id: Uuid,
        is_active: Option<bool>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM webhook_subscriptions
            WHERE tenant_id = $1
              AND ($2::BOOLEAN IS NULL OR is_active = $2)
            ",
        )
        .bind(tenant_id)
        .bind(is_active)
        .fetch_one(pool)
        .await
    }

    /// Overwrite the administrator-editable settings of a subscription.
    ///
    /// `secret_encrypted` and `is_active` are not touched, so a settings
    /// update racing with a rotation or deactivation cannot undo it.
    /// Returns false when no row matched.
    pub async fn update_settings(pool: &PgPool, row: &Self) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET name = $3,
                description = $4,
                target_url = $5,
                subscribed_events = $6,
                max_retries = $7,
                retry_delay_seconds = $8,
                updated_at = $9
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(row.id)
        .bind(row.tenant_id)
        .bind(&row.name)
        .bind(&row.description)
        .bind(&row.target_url)
        .bind(&row.subscribed_events)
        .bind(row.max_retries)
        .bind(row.retry_delay_seconds)
        .bind(row.updated_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Activate or deactivate a subscription.
    pub async fn set_active(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET is_active = $3, updated_at = $4
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(is_active)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replace the encrypted signing secret.
    pub async fn replace_secret(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET secret_encrypted = $3, updated_at = $4
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(secret_encrypted)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a subscription. Delivery history is left in place.
    pub async fn delete(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            DELETE FROM webhook_subscriptions
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
