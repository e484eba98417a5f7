//! Persistence interfaces for subscriptions and deliveries.
//!
//! Every lookup is tenant-scoped except the scheduler's claim path, which
//! sweeps due deliveries across all tenants.

use async_trait::async_trait;
use carepath_core::{DeliveryId, SubscriptionId, TenantId};
use chrono::{DateTime, Utc};

use crate::events::WebhookEventType;
use crate::models::{DeliveryStatus, WebhookDelivery, WebhookSubscription};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store failure. Never recorded as a delivery failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: uuid::Uuid, reason: String },
}

impl StoreError {
    /// Whether the next sweep or request may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            StoreError::Corrupt { .. } => false,
        }
    }
}

impl From<carepath_db::DbError> for StoreError {
    fn from(err: carepath_db::DbError) -> Self {
        match err {
            carepath_db::DbError::ConnectionFailed(e) | carepath_db::DbError::QueryFailed(e) => {
                StoreError::Database(e)
            }
            carepath_db::DbError::MigrationFailed(e) => StoreError::Unavailable(e.to_string()),
        }
    }
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert_subscription(&self, subscription: &WebhookSubscription)
        -> Result<(), StoreError>;

    async fn find_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<Option<WebhookSubscription>, StoreError>;

    /// Active subscriptions of `tenant_id` whose event set contains `event_type`.
    async fn find_active_by_event_type(
        &self,
        tenant_id: TenantId,
        event_type: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, StoreError>;

    async fn list_subscriptions(
        &self,
        tenant_id: TenantId,
        is_active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookSubscription>, StoreError>;

    async fn count_subscriptions(
        &self,
        tenant_id: TenantId,
        is_active: Option<bool>,
    ) -> Result<i64, StoreError>;

    /// Write the administrator-editable settings: name, description, target
    /// URL, event set and retry policy.
    ///
    /// The signing secret and the active flag are never written here; they
    /// change only through [`Self::replace_subscription_secret`] and
    /// [`Self::set_subscription_active`]. Returns false when the subscription
    /// does not exist.
    async fn update_subscription(&self, subscription: &WebhookSubscription)
        -> Result<bool, StoreError>;

    /// Returns false when the subscription does not exist.
    async fn set_subscription_active(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Store a new encrypted signing secret. Returns false when the
    /// subscription does not exist.
    async fn replace_subscription_secret(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
        secret_encrypted: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn delete_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError>;

    async fn find_delivery(
        &self,
        tenant_id: TenantId,
        id: DeliveryId,
    ) -> Result<Option<WebhookDelivery>, StoreError>;

    async fn list_deliveries(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookDelivery>, StoreError>;

    async fn count_deliveries(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, StoreError>;

    /// Atomically claim up to `limit` due deliveries until `claim_until`.
    ///
    /// A claimed row is invisible to other callers until the claim is
    /// completed, released, or expires.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, StoreError>;

    /// Persist the outcome of an attempt and drop the claim.
    ///
    /// Applies only if the stored row is still non-terminal and its
    /// `attempt_count` equals `expected_attempt_count`; returns false otherwise.
    async fn complete_attempt(
        &self,
        delivery: &WebhookDelivery,
        expected_attempt_count: u32,
    ) -> Result<bool, StoreError>;

    /// Extend a claim to `claim_until`, right before the claimed delivery is
    /// dispatched.
    ///
    /// Applies only if the row is non-terminal and still carries the claim
    /// this worker took (`claimed_until == held_until`). Returns false when
    /// that claim lapsed and another worker has since claimed the row.
    async fn renew_claim(
        &self,
        id: DeliveryId,
        held_until: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Drop a claim without touching attempt state.
    async fn release_claim(&self, id: DeliveryId) -> Result<bool, StoreError>;
}
