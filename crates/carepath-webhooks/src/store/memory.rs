//! In-memory store for tests and single-process development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use carepath_core::{DeliveryId, SubscriptionId, TenantAware, TenantId};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{DeliveryStore, StoreError, SubscriptionStore};
use crate::events::WebhookEventType;
use crate::models::{DeliveryStatus, WebhookDelivery, WebhookSubscription};

/// Implements both store traits behind `tokio` read/write locks.
///
/// Claiming takes the delivery write lock, so concurrent schedulers sharing
/// one `MemoryStore` never claim the same delivery twice.
#[derive(Debug, Default)]
pub struct MemoryStore {
    subscriptions: RwLock<HashMap<SubscriptionId, WebhookSubscription>>,
    deliveries: RwLock<HashMap<DeliveryId, WebhookDelivery>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    /// Every delivery across tenants, oldest first.
    pub async fn all_deliveries(&self) -> Vec<WebhookDelivery> {
        let deliveries = self.deliveries.read().await;
        let mut all: Vec<_> = deliveries.values().cloned().collect();
        sort_oldest_first(&mut all);
        all
    }
}

fn sort_oldest_first(deliveries: &mut [WebhookDelivery]) {
    deliveries.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn page<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
    let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
    items.into_iter().skip(offset).take(limit).collect()
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn insert_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        self.subscriptions
            .write()
            .await
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn find_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<Option<WebhookSubscription>, StoreError> {
        self.check_available()?;
        Ok(self
            .subscriptions
            .read()
            .await
            .get(&id)
            .filter(|s| s.belongs_to(tenant_id))
            .cloned())
    }

    async fn find_active_by_event_type(
        &self,
        tenant_id: TenantId,
        event_type: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        self.check_available()?;
        let subscriptions = self.subscriptions.read().await;
        let mut matches: Vec<_> = subscriptions
            .values()
            .filter(|s| s.receives(tenant_id, event_type))
            .cloned()
            .collect();
        matches.sort_by_key(|s| (s.created_at, s.id));
        Ok(matches)
    }

    async fn list_subscriptions(
        &self,
        tenant_id: TenantId,
        is_active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        self.check_available()?;
        let subscriptions = self.subscriptions.read().await;
        let mut items: Vec<_> = subscriptions
            .values()
            .filter(|s| s.belongs_to(tenant_id))
            .filter(|s| is_active.map_or(true, |active| s.is_active == active))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(page(items, limit, offset))
    }

    async fn count_subscriptions(
        &self,
        tenant_id: TenantId,
        is_active: Option<bool>,
    ) -> Result<i64, StoreError> {
        self.check_available()?;
        let subscriptions = self.subscriptions.read().await;
        Ok(count(
            subscriptions
                .values()
                .filter(|s| s.belongs_to(tenant_id))
                .filter(|s| is_active.map_or(true, |active| s.is_active == active))
                .count(),
        ))
    }

    async fn update_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.get_mut(&subscription.id) {
            Some(existing) if existing.belongs_to(subscription.tenant_id) => {
                existing.name.clone_from(&subscription.name);
                existing.description.clone_from(&subscription.description);
                existing.target_url.clone_from(&subscription.target_url);
                existing
                    .subscribed_events
                    .clone_from(&subscription.subscribed_events);
                existing.max_retries = subscription.max_retries;
                existing.retry_delay_seconds = subscription.retry_delay_seconds;
                existing.updated_at = subscription.updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_subscription_active(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.get_mut(&id) {
            Some(existing) if existing.belongs_to(tenant_id) => {
                existing.set_active(active, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn replace_subscription_secret(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
        secret_encrypted: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.get_mut(&id) {
            Some(existing) if existing.belongs_to(tenant_id) => {
                existing.replace_secret(secret_encrypted.to_string(), now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.get(&id).is_some_and(|s| s.belongs_to(tenant_id)) {
            subscriptions.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        self.check_available()?;
        self.deliveries
            .write()
            .await
            .insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn find_delivery(
        &self,
        tenant_id: TenantId,
        id: DeliveryId,
    ) -> Result<Option<WebhookDelivery>, StoreError> {
        self.check_available()?;
        Ok(self
            .deliveries
            .read()
            .await
            .get(&id)
            .filter(|d| d.belongs_to(tenant_id))
            .cloned())
    }

    async fn list_deliveries(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        self.check_available()?;
        let deliveries = self.deliveries.read().await;
        let mut items: Vec<_> = deliveries
            .values()
            .filter(|d| d.belongs_to(tenant_id) && d.subscription_id == subscription_id)
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect();
        sort_oldest_first(&mut items);
        items.reverse();
        Ok(page(items, limit, offset))
    }

    async fn count_deliveries(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, StoreError> {
        self.check_available()?;
        let deliveries = self.deliveries.read().await;
        Ok(count(
            deliveries
                .values()
                .filter(|d| d.belongs_to(tenant_id) && d.subscription_id == subscription_id)
                .filter(|d| status.map_or(true, |s| d.status == s))
                .count(),
        ))
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        self.check_available()?;
        let mut deliveries = self.deliveries.write().await;

        let mut due: Vec<_> = deliveries
            .values()
            .filter(|d| d.is_due(now))
            .map(|d| (d.created_at, d.id))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(delivery) = deliveries.get_mut(&id) {
                delivery.claimed_until = Some(claim_until);
                claimed.push(delivery.clone());
            }
        }
        Ok(claimed)
    }

    async fn complete_attempt(
        &self,
        delivery: &WebhookDelivery,
        expected_attempt_count: u32,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut deliveries = self.deliveries.write().await;
        match deliveries.get_mut(&delivery.id) {
            Some(stored)
                if !stored.is_terminal()
                    && stored.attempt_count == expected_attempt_count
                    && stored.belongs_to(delivery.tenant_id) =>
            {
                *stored = delivery.clone();
                stored.claimed_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn renew_claim(
        &self,
        id: DeliveryId,
        held_until: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut deliveries = self.deliveries.write().await;
        match deliveries.get_mut(&id) {
            Some(stored) if !stored.is_terminal() && stored.claimed_until == Some(held_until) => {
                stored.claimed_until = Some(claim_until);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claim(&self, id: DeliveryId) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut deliveries = self.deliveries.write().await;
        match deliveries.get_mut(&id) {
            Some(stored) if !stored.is_terminal() => {
                stored.claimed_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
