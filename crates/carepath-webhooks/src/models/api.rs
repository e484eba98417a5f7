//! Admin API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::events::WebhookEventType;
use crate::models::{DeliveryStatus, WebhookDelivery, WebhookSubscription};

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateSubscriptionRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    /// Absolute HTTPS endpoint that receives the POSTs.
    pub target_url: String,
    /// Event tags, e.g. `journey.stage_changed`.
    #[validate(length(min = 1, message = "at least one event type is required"))]
    pub subscribed_events: Vec<String>,
    #[validate(range(max = 10))]
    pub max_retries: Option<u32>,
    #[validate(range(min = 1, max = 86400))]
    pub retry_delay_seconds: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateSubscriptionRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub target_url: Option<String>,
    #[validate(length(min = 1, message = "at least one event type is required"))]
    pub subscribed_events: Option<Vec<String>>,
    #[validate(range(max = 10))]
    pub max_retries: Option<u32>,
    #[validate(range(min = 1, max = 86400))]
    pub retry_delay_seconds: Option<u32>,
    pub is_active: Option<bool>,
}

/// Subscription as returned by the API. Never carries the secret.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub target_url: String,
    pub subscribed_events: Vec<String>,
    pub is_active: bool,
    pub max_retries: u32,
    pub retry_delay_seconds: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&WebhookSubscription> for SubscriptionResponse {
    fn from(sub: &WebhookSubscription) -> Self {
        Self {
            id: sub.id.into_uuid(),
            tenant_id: sub.tenant_id.into_uuid(),
            name: sub.name.clone(),
            description: sub.description.clone(),
            target_url: sub.target_url.clone(),
            subscribed_events: sub
                .subscribed_events
                .iter()
                .map(|et| et.as_str().to_string())
                .collect(),
            is_active: sub.is_active,
            max_retries: sub.max_retries,
            retry_delay_seconds: sub.retry_delay_seconds,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

/// Returned once on creation; the secret is not retrievable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatedSubscriptionResponse {
    #[serde(flatten)]
    pub subscription: SubscriptionResponse,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SecretRotatedResponse {
    pub id: Uuid,
    pub secret: String,
    pub rotated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListSubscriptionsQuery {
    pub is_active: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Default for ListSubscriptionsQuery {
    fn default() -> Self {
        Self {
            is_active: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionListResponse {
    pub items: Vec<SubscriptionResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventTypeInfo {
    pub event_type: String,
    pub category: String,
    pub description: String,
}

impl From<WebhookEventType> for EventTypeInfo {
    fn from(et: WebhookEventType) -> Self {
        Self {
            event_type: et.as_str().to_string(),
            category: et.category().to_string(),
            description: et.description().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventTypeListResponse {
    pub event_types: Vec<EventTypeInfo>,
}

// ---------------------------------------------------------------------------
// Deliveries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListDeliveriesQuery {
    /// One of `pending`, `retrying`, `delivered`, `failed`.
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Default for ListDeliveriesQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryResponse {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status_code: Option<u16>,
    pub error_message: Option<String>,
    pub latency_ms: Option<u32>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&WebhookDelivery> for DeliveryResponse {
    fn from(d: &WebhookDelivery) -> Self {
        Self {
            id: d.id.into_uuid(),
            subscription_id: d.subscription_id.into_uuid(),
            event_id: d.event_id.into_uuid(),
            event_type: d.event_type.as_str().to_string(),
            status: d.status,
            attempt_count: d.attempt_count,
            next_retry_at: d.next_retry_at,
            response_status_code: d.response_status_code,
            error_message: d.error_message.clone(),
            latency_ms: d.latency_ms,
            delivered_at: d.delivered_at,
            failed_at: d.failed_at,
            created_at: d.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryDetailResponse {
    #[serde(flatten)]
    pub delivery: DeliveryResponse,
    pub target_url: String,
    pub payload_json: String,
    pub response_body: Option<String>,
}

impl From<&WebhookDelivery> for DeliveryDetailResponse {
    fn from(d: &WebhookDelivery) -> Self {
        Self {
            delivery: DeliveryResponse::from(d),
            target_url: d.target_url.clone(),
            payload_json: d.payload_json.clone(),
            response_body: d.response_body.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryListResponse {
    pub items: Vec<DeliveryResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}
