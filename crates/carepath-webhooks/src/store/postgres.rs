//! PostgreSQL store backed by the `carepath-db` row models.

use std::collections::BTreeSet;

use async_trait::async_trait;
use carepath_core::{DeliveryId, SubscriptionId, TenantId};
use carepath_db::models::{WebhookDeliveryRow, WebhookSubscriptionRow};
use carepath_db::DbPool;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{DeliveryStore, StoreError, SubscriptionStore};
use crate::events::WebhookEventType;
use crate::models::{DeliveryStatus, WebhookDelivery, WebhookSubscription};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn from_db_pool(pool: &DbPool) -> Self {
        Self::new(pool.inner().clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn subscription_to_row(sub: &WebhookSubscription) -> WebhookSubscriptionRow {
    WebhookSubscriptionRow {
        id: sub.id.into_uuid(),
        tenant_id: sub.tenant_id.into_uuid(),
        name: sub.name.clone(),
        description: sub.description.clone(),
        target_url: sub.target_url.clone(),
        secret_encrypted: sub.secret_encrypted.clone(),
        subscribed_events: sub
            .subscribed_events
            .iter()
            .map(|et| et.as_str().to_string())
            .collect(),
        is_active: sub.is_active,
        max_retries: to_i32(sub.max_retries),
        retry_delay_seconds: to_i32(sub.retry_delay_seconds),
        created_at: sub.created_at,
        updated_at: sub.updated_at,
    }
}

fn subscription_from_row(row: WebhookSubscriptionRow) -> Result<WebhookSubscription, StoreError> {
    let subscribed_events: BTreeSet<WebhookEventType> = row
        .subscribed_events
        .iter()
        .map(|tag| {
            WebhookEventType::parse(tag).ok_or_else(|| StoreError::Corrupt {
                id: row.id,
                reason: format!("unknown event type {tag}"),
            })
        })
        .collect::<Result<_, _>>()?;

    Ok(WebhookSubscription {
        id: SubscriptionId::from_uuid(row.id),
        tenant_id: TenantId::from_uuid(row.tenant_id),
        name: row.name,
        description: row.description,
        target_url: row.target_url,
        secret_encrypted: row.secret_encrypted,
        subscribed_events,
        is_active: row.is_active,
        max_retries: to_u32(row.max_retries),
        retry_delay_seconds: to_u32(row.retry_delay_seconds),
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn delivery_to_row(d: &WebhookDelivery) -> WebhookDeliveryRow {
    WebhookDeliveryRow {
        id: d.id.into_uuid(),
        subscription_id: d.subscription_id.into_uuid(),
        tenant_id: d.tenant_id.into_uuid(),
        event_id: d.event_id.into_uuid(),
        event_type: d.event_type.as_str().to_string(),
        payload_json: d.payload_json.clone(),
        target_url: d.target_url.clone(),
        status: d.status.as_str().to_string(),
        attempt_count: to_i32(d.attempt_count),
        next_retry_at: d.next_retry_at,
        delivered_at: d.delivered_at,
        failed_at: d.failed_at,
        response_status_code: d.response_status_code.map(i32::from),
        response_body: d.response_body.clone(),
        error_message: d.error_message.clone(),
        latency_ms: d.latency_ms.map(to_i32),
        claimed_until: d.claimed_until,
        created_at: d.created_at,
        updated_at: d.updated_at,
    }
}

fn delivery_from_row(row: WebhookDeliveryRow) -> Result<WebhookDelivery, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt { id: row.id, reason };
    let event_type = WebhookEventType::parse(&row.event_type)
        .ok_or_else(|| corrupt(format!("unknown event type {}", row.event_type)))?;
    let status = DeliveryStatus::parse(&row.status)
        .ok_or_else(|| corrupt(format!("unknown status {}", row.status)))?;

    Ok(WebhookDelivery {
        id: DeliveryId::from_uuid(row.id),
        subscription_id: SubscriptionId::from_uuid(row.subscription_id),
        tenant_id: TenantId::from_uuid(row.tenant_id),
        event_id: row.event_id.into(),
        event_type,
        payload_json: row.payload_json,
        target_url: row.target_url,
        status,
        attempt_count: to_u32(row.attempt_count),
        next_retry_at: row.next_retry_at,
        delivered_at: row.delivered_at,
        failed_at: row.failed_at,
        response_status_code: row
            .response_status_code
            .and_then(|code| u16::try_from(code).ok()),
        response_body: row.response_body,
        error_message: row.error_message,
        latency_ms: row.latency_ms.map(to_u32),
        claimed_until: row.claimed_until,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn collect<T, R>(
    rows: Vec<R>,
    map: impl Fn(R) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    rows.into_iter().map(map).collect()
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn insert_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<(), StoreError> {
        WebhookSubscriptionRow::insert(&self.pool, &subscription_to_row(subscription)).await?;
        Ok(())
    }

    async fn find_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<Option<WebhookSubscription>, StoreError> {
        WebhookSubscriptionRow::find_by_id(&self.pool, tenant_id.into_uuid(), id.into_uuid())
            .await?
            .map(subscription_from_row)
            .transpose()
    }

    async fn find_active_by_event_type(
        &self,
        tenant_id: TenantId,
        event_type: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        let rows = WebhookSubscriptionRow::find_active_by_event_type(
            &self.pool,
            tenant_id.into_uuid(),
            event_type.as_str(),
        )
        .await?;
        collect(rows, subscription_from_row)
    }

    async fn list_subscriptions(
        &self,
        tenant_id: TenantId,
        is_active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        let rows = WebhookSubscriptionRow::list_by_tenant(
            &self.pool,
            tenant_id.into_uuid(),
            is_active,
            limit,
            offset,
        )
        .await?;
        collect(rows, subscription_from_row)
    }

    async fn count_subscriptions(
        &self,
        tenant_id: TenantId,
        is_active: Option<bool>,
    ) -> Result<i64, StoreError> {
        Ok(
            WebhookSubscriptionRow::count_by_tenant(&self.pool, tenant_id.into_uuid(), is_active)
                .await?,
        )
    }

    async fn update_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<bool, StoreError> {
        Ok(
            WebhookSubscriptionRow::update_settings(&self.pool, &subscription_to_row(subscription))
                .await?,
        )
    }

    async fn set_subscription_active(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(WebhookSubscriptionRow::set_active(
            &self.pool,
            tenant_id.into_uuid(),
            id.into_uuid(),
            active,
            now,
        )
        .await?)
    }

    async fn replace_subscription_secret(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
        secret_encrypted: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(WebhookSubscriptionRow::replace_secret(
            &self.pool,
            tenant_id.into_uuid(),
            id.into_uuid(),
            secret_encrypted,
            now,
        )
        .await?)
    }

    async fn delete_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<bool, StoreError> {
        Ok(
            WebhookSubscriptionRow::delete(&self.pool, tenant_id.into_uuid(), id.into_uuid())
                .await?,
        )
    }
}

#[async_trait]
impl DeliveryStore for PgStore {
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        WebhookDeliveryRow::insert(&self.pool, &delivery_to_row(delivery)).await?;
        Ok(())
    }

    async fn find_delivery(
        &self,
        tenant_id: TenantId,
        id: DeliveryId,
    ) -> Result<Option<WebhookDelivery>, StoreError> {
        WebhookDeliveryRow::find_by_id(&self.pool, tenant_id.into_uuid(), id.into_uuid())
            .await?
            .map(delivery_from_row)
            .transpose()
    }

    async fn list_deliveries(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let rows = WebhookDeliveryRow::list_by_subscription(
            &self.pool,
            tenant_id.into_uuid(),
            subscription_id.into_uuid(),
            status.as_ref().map(DeliveryStatus::as_str),
            limit,
            offset,
        )
        .await?;
        collect(rows, delivery_from_row)
    }

    async fn count_deliveries(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, StoreError> {
        Ok(WebhookDeliveryRow::count_by_subscription(
            &self.pool,
            tenant_id.into_uuid(),
            subscription_id.into_uuid(),
            status.as_ref().map(DeliveryStatus::as_str),
        )
        .await?)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = WebhookDeliveryRow::claim_due(&self.pool, now, claim_until, limit).await?;
        Ok(readable_claims(rows))
    }

    async fn complete_attempt(
        &self,
        delivery: &WebhookDelivery,
        expected_attempt_count: u32,
    ) -> Result<bool, StoreError> {
        Ok(WebhookDeliveryRow::complete_attempt(
            &self.pool,
            &delivery_to_row(delivery),
            to_i32(expected_attempt_count),
        )
        .await?)
    }

    async fn renew_claim(
        &self,
        id: DeliveryId,
        held_until: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(
            WebhookDeliveryRow::renew_claim(&self.pool, id.into_uuid(), held_until, claim_until)
                .await?,
        )
    }

    async fn release_claim(&self, id: DeliveryId) -> Result<bool, StoreError> {
        Ok(WebhookDeliveryRow::release(&self.pool, id.into_uuid()).await?)
    }
}

/// Maps claimed rows, dropping any that cannot be read.
///
/// An unreadable row keeps its claim, so it comes back once per claim lease
/// rather than on every tick.
fn readable_claims(rows: Vec<WebhookDeliveryRow>) -> Vec<WebhookDelivery> {
    let mut claimed = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id;
        match delivery_from_row(row) {
            Ok(delivery) => claimed.push(delivery),
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %id,
                    error = %e,
                    "Skipping unreadable delivery row"
                );
            }
        }
    }
    claimed
}
