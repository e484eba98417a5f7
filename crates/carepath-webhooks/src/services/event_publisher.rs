//! Durable fan-out of domain events to matching subscriptions.
//!
//! Publishing only enqueues: one `pending` delivery per active subscription
//! of the tenant that wants the event. The retry scheduler sends them.

use std::sync::Arc;

use carepath_core::{DeliveryId, EventId, TenantId};
use chrono::{DateTime, Utc};

use crate::error::WebhookError;
use crate::events::{WebhookEvent, WebhookPayload};
use crate::models::WebhookDelivery;
use crate::store::{DeliveryStore, SubscriptionStore};

/// What a publish call enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub event_id: EventId,
    pub delivery_ids: Vec<DeliveryId>,
}

impl PublishReceipt {
    pub fn delivery_count(&self) -> usize {
        self.delivery_ids.len()
    }
}

#[derive(Clone)]
pub struct EventPublisher {
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
}

impl EventPublisher {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
    ) -> Self {
        Self {
            subscriptions,
            deliveries,
        }
    }

    /// Fan `event` out to every active subscription of `tenant_id` that wants it.
    ///
    /// Zero matches is a no-op. A store failure is returned to the caller;
    /// deliveries written before the failure stay in place.
    pub async fn publish_event(
        &self,
        tenant_id: TenantId,
        event: &WebhookEvent,
    ) -> Result<PublishReceipt, WebhookError> {
        self.publish_event_at(tenant_id, event, Utc::now()).await
    }

    pub async fn publish_event_at(
        &self,
        tenant_id: TenantId,
        event: &WebhookEvent,
        now: DateTime<Utc>,
    ) -> Result<PublishReceipt, WebhookError> {
        if tenant_id.is_nil() {
            return Err(WebhookError::Validation(
                "tenant_id must not be empty".to_string(),
            ));
        }

        let event_type = event.event_type();
        let event_id = EventId::new();

        let subscriptions = self
            .subscriptions
            .find_active_by_event_type(tenant_id, event_type)
            .await?;

        if subscriptions.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                event_id = %event_id,
                event_type = %event_type,
                tenant_id = %tenant_id,
                "No active subscriptions match event type"
            );
            return Ok(PublishReceipt {
                event_id,
                delivery_ids: Vec::new(),
            });
        }

        // Serialized once; every delivery of this event carries the same bytes.
        let payload_json =
            WebhookPayload::new(event_id, tenant_id, now, event)?.to_canonical_json()?;

        let mut delivery_ids = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions
            .iter()
            .filter(|s| s.receives(tenant_id, event_type))
        {
            let delivery = WebhookDelivery::pending(
                subscription,
                event_id,
                event_type,
                payload_json.clone(),
                now,
            );

            if let Err(e) = self.deliveries.insert_delivery(&delivery).await {
                tracing::error!(
                    target: "webhook_delivery",
                    event_id = %event_id,
                    subscription_id = %subscription.id,
                    tenant_id = %tenant_id,
                    created = delivery_ids.len(),
                    error = %e,
                    "Failed to create delivery record"
                );
                return Err(e.into());
            }
            delivery_ids.push(delivery.id);
        }

        tracing::info!(
            target: "webhook_delivery",
            event_id = %event_id,
            event_type = %event_type,
            tenant_id = %tenant_id,
            delivery_count = delivery_ids.len(),
            "Event enqueued for webhook delivery"
        );

        Ok(PublishReceipt {
            event_id,
            delivery_ids,
        })
    }
}
