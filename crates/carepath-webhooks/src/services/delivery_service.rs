//! Delivery history and manual replay.

use std::sync::Arc;

use carepath_core::{DeliveryId, SubscriptionId, TenantId};
use chrono::Utc;

use crate::error::WebhookError;
use crate::models::{
    DeliveryDetailResponse, DeliveryListResponse, DeliveryResponse, DeliveryStatus,
    ListDeliveriesQuery, WebhookDelivery,
};
use crate::store::{DeliveryStore, SubscriptionStore};

/// Read access to delivery records plus replay of failed ones.
#[derive(Clone)]
pub struct DeliveryService {
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
}

impl DeliveryService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
    ) -> Self {
        Self {
            subscriptions,
            deliveries,
        }
    }

    /// List deliveries of one subscription, newest first.
    pub async fn list_deliveries(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        query: ListDeliveriesQuery,
    ) -> Result<DeliveryListResponse, WebhookError> {
        self.ensure_subscription(tenant_id, subscription_id).await?;

        let status = match query.status.as_deref() {
            Some(s) => Some(DeliveryStatus::parse(s).ok_or_else(|| {
                WebhookError::Validation(format!("Unknown delivery status: {s}"))
            })?),
            None => None,
        };
        let limit = query.limit.clamp(1, 100);
        let offset = query.offset.max(0);

        let items = self
            .deliveries
            .list_deliveries(tenant_id, subscription_id, status, limit, offset)
            .await?;
        let total = self
            .deliveries
            .count_deliveries(tenant_id, subscription_id, status)
            .await?;

        Ok(DeliveryListResponse {
            items: items.iter().map(DeliveryResponse::from).collect(),
            total,
            limit,
            offset,
        })
    }

    pub async fn get_delivery(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        delivery_id: DeliveryId,
    ) -> Result<DeliveryDetailResponse, WebhookError> {
        let delivery = self
            .load(tenant_id, subscription_id, delivery_id)
            .await?;
        Ok(DeliveryDetailResponse::from(&delivery))
    }

    /// Enqueue a fresh `pending` copy of a failed delivery.
    ///
    /// The copy carries the original payload bytes and event id, and targets
    /// the subscription's current URL. The failed record is left untouched.
    pub async fn replay_delivery(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        delivery_id: DeliveryId,
    ) -> Result<DeliveryResponse, WebhookError> {
        let original = self
            .load(tenant_id, subscription_id, delivery_id)
            .await?;
        if original.status != DeliveryStatus::Failed {
            return Err(WebhookError::DeliveryNotReplayable {
                status: original.status.to_string(),
            });
        }

        let subscription = self
            .subscriptions
            .find_subscription(tenant_id, subscription_id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)?;
        if !subscription.is_active {
            return Err(WebhookError::SubscriptionInactive);
        }

        let replay = original.replay(subscription.target_url.clone(), Utc::now());
        self.deliveries.insert_delivery(&replay).await?;

        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %replay.id,
            replayed_from = %original.id,
            subscription_id = %subscription_id,
            tenant_id = %tenant_id,
            event_id = %replay.event_id,
            "Failed delivery replayed"
        );

        Ok(DeliveryResponse::from(&replay))
    }

    async fn ensure_subscription(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
    ) -> Result<(), WebhookError> {
        self.subscriptions
            .find_subscription(tenant_id, subscription_id)
            .await?
            .map(|_| ())
            .ok_or(WebhookError::SubscriptionNotFound)
    }

    async fn load(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        delivery_id: DeliveryId,
    ) -> Result<WebhookDelivery, WebhookError> {
        self.deliveries
            .find_delivery(tenant_id, delivery_id)
            .await?
            .filter(|d| d.subscription_id == subscription_id)
            .ok_or(WebhookError::DeliveryNotFound)
    }
}
