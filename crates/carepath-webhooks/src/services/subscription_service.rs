//! Webhook subscription CRUD service.
//!
//! Provides business logic for creating, listing, updating, activating and
//! deleting webhook subscriptions with URL validation, SSRF protection,
//! secret generation and encryption, subscription limits, and event type
//! validation.

use std::sync::Arc;

use carepath_core::{SubscriptionId, TenantId};
use chrono::{DateTime, Utc};
use validator::Validate;

use crate::config::{WebhookConfig, DEFAULT_MAX_SUBSCRIPTIONS};
use crate::crypto;
use crate::error::WebhookError;
use crate::models::{
    CreateSubscriptionRequest, CreatedSubscriptionResponse, ListSubscriptionsQuery,
    SecretRotatedResponse, SubscriptionListResponse, SubscriptionResponse,
    UpdateSubscriptionRequest, WebhookSubscription,
};
use crate::retry::RetryPolicy;
use crate::store::SubscriptionStore;
use crate::validation::{self, UrlPolicy};

/// Service for webhook subscription operations.
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    encryption_key: Vec<u8>,
    max_subscriptions: i64,
    url_policy: UrlPolicy,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn SubscriptionStore>, encryption_key: Vec<u8>) -> Self {
        Self {
            store,
            encryption_key,
            max_subscriptions: DEFAULT_MAX_SUBSCRIPTIONS,
            url_policy: UrlPolicy::default(),
        }
    }

    pub fn from_config(store: Arc<dyn SubscriptionStore>, config: &WebhookConfig) -> Self {
        Self::new(store, config.encryption_key.clone())
            .with_max_subscriptions(config.max_subscriptions_per_tenant)
            .with_url_policy(config.url_policy)
    }

    /// Set the maximum subscriptions per tenant.
    #[must_use]
    pub fn with_max_subscriptions(mut self, max: i64) -> Self {
        self.max_subscriptions = max;
        self
    }

    /// Relax URL checks (for development/testing).
    #[must_use]
    pub fn with_url_policy(mut self, policy: UrlPolicy) -> Self {
        self.url_policy = policy;
        self
    }

    /// Create a new, inactive subscription with a freshly generated secret.
    ///
    /// The plaintext secret is returned here and never again.
    pub async fn create_subscription(
        &self,
        tenant_id: TenantId,
        request: CreateSubscriptionRequest,
    ) -> Result<CreatedSubscriptionResponse, WebhookError> {
        request.validate()?;
        validation::validate_webhook_url(&request.target_url, self.url_policy)?;
        let events = validation::parse_event_types(&request.subscribed_events)?;

        let count = self.store.count_subscriptions(tenant_id, None).await?;
        if count >= self.max_subscriptions {
            return Err(WebhookError::SubscriptionLimitExceeded {
                limit: self.max_subscriptions,
            });
        }

        let secret = crypto::generate_secret();
        let secret_encrypted = crypto::encrypt_secret(&secret, &self.encryption_key)?;

        let defaults = RetryPolicy::default();
        let policy = RetryPolicy {
            max_retries: request.max_retries.unwrap_or(defaults.max_retries),
            retry_delay_seconds: request
                .retry_delay_seconds
                .unwrap_or(defaults.retry_delay_seconds),
        };

        let subscription = WebhookSubscription::new(
            tenant_id,
            request.name,
            request.target_url,
            secret_encrypted,
            events,
            policy,
            Utc::now(),
        )
        .with_description(request.description);

        self.store.insert_subscription(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            tenant_id = %tenant_id,
            event_count = subscription.subscribed_events.len(),
            "Webhook subscription created"
        );

        Ok(CreatedSubscriptionResponse {
            subscription: SubscriptionResponse::from(&subscription),
            secret,
        })
    }

    /// List webhook subscriptions for a tenant with pagination.
    pub async fn list_subscriptions(
        &self,
        tenant_id: TenantId,
        query: ListSubscriptionsQuery,
    ) -> Result<SubscriptionListResponse, WebhookError> {
        let limit = query.limit.clamp(1, 100);
        let offset = query.offset.max(0);

        let subs = self
            .store
            .list_subscriptions(tenant_id, query.is_active, limit, offset)
            .await?;
        let total = self
            .store
            .count_subscriptions(tenant_id, query.is_active)
            .await?;

        Ok(SubscriptionListResponse {
            items: subs.iter().map(SubscriptionResponse::from).collect(),
            total,
            limit,
            offset,
        })
    }

    pub async fn get_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<SubscriptionResponse, WebhookError> {
        let sub = self.load(tenant_id, id).await?;
        Ok(SubscriptionResponse::from(&sub))
    }

    /// Apply a partial update.
    ///
    /// URL changes affect only deliveries created afterwards; queued
    /// deliveries keep the URL they captured. The settings write never
    /// carries the secret or the active flag, so a concurrent rotation or
    /// deactivation is not undone.
    pub async fn update_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
        request: UpdateSubscriptionRequest,
    ) -> Result<SubscriptionResponse, WebhookError> {
        request.validate()?;
        if let Some(ref url) = request.target_url {
            validation::validate_webhook_url(url, self.url_policy)?;
        }
        let events = match request.subscribed_events {
            Some(ref tags) => Some(validation::parse_event_types(tags)?),
            None => None,
        };

        let mut sub = self.load(tenant_id, id).await?;
        if let Some(name) = request.name {
            sub.name = name;
        }
        if let Some(description) = request.description {
            sub.description = Some(description);
        }
        if let Some(url) = request.target_url {
            sub.target_url = url;
        }
        if let Some(events) = events {
            sub.subscribed_events = events;
        }
        if let Some(max_retries) = request.max_retries {
            sub.max_retries = max_retries;
        }
        if let Some(delay) = request.retry_delay_seconds {
            sub.retry_delay_seconds = delay;
        }
        let now = Utc::now();
        sub.updated_at = now;

        if !self.store.update_subscription(&sub).await? {
            return Err(WebhookError::SubscriptionNotFound);
        }
        if let Some(active) = request.is_active {
            self.write_active(tenant_id, id, active, now).await?;
        }
        // Re-read so the response reflects concurrent activation changes.
        let sub = self.load(tenant_id, id).await?;

        tracing::info!(
            subscription_id = %id,
            tenant_id = %tenant_id,
            is_active = sub.is_active,
            "Webhook subscription updated"
        );

        Ok(SubscriptionResponse::from(&sub))
    }

    pub async fn activate_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<SubscriptionResponse, WebhookError> {
        self.set_active(tenant_id, id, true).await
    }

    /// Deactivate a subscription. Queued deliveries against it fail on their
    /// next attempt.
    pub async fn deactivate_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<SubscriptionResponse, WebhookError> {
        self.set_active(tenant_id, id, false).await
    }

    async fn set_active(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
        active: bool,
    ) -> Result<SubscriptionResponse, WebhookError> {
        self.write_active(tenant_id, id, active, Utc::now()).await?;
        let sub = self.load(tenant_id, id).await?;

        tracing::info!(
            subscription_id = %id,
            tenant_id = %tenant_id,
            is_active = active,
            "Webhook subscription activation changed"
        );

        Ok(SubscriptionResponse::from(&sub))
    }

    /// Replace the signing secret. The old secret stops validating at once.
    pub async fn rotate_secret(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<SecretRotatedResponse, WebhookError> {
        let secret = crypto::generate_secret();
        let secret_encrypted = crypto::encrypt_secret(&secret, &self.encryption_key)?;
        let now = Utc::now();
        if !self
            .store
            .replace_subscription_secret(tenant_id, id, &secret_encrypted, now)
            .await?
        {
            return Err(WebhookError::SubscriptionNotFound);
        }

        tracing::info!(
            subscription_id = %id,
            tenant_id = %tenant_id,
            "Webhook subscription secret rotated"
        );

        Ok(SecretRotatedResponse {
            id: id.into_uuid(),
            secret,
            rotated_at: now,
        })
    }

    /// Delete a subscription. Its delivery history is kept; queued deliveries
    /// fail with "subscription not found".
    pub async fn delete_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<(), WebhookError> {
        if !self.store.delete_subscription(tenant_id, id).await? {
            return Err(WebhookError::SubscriptionNotFound);
        }
        tracing::info!(
            subscription_id = %id,
            tenant_id = %tenant_id,
            "Webhook subscription deleted"
        );
        Ok(())
    }

    async fn load(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<WebhookSubscription, WebhookError> {
        self.store
            .find_subscription(tenant_id, id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)
    }

    async fn write_active(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        if !self
            .store
            .set_subscription_active(tenant_id, id, active, now)
            .await?
        {
            return Err(WebhookError::SubscriptionNotFound);
        }
        Ok(())
    }
}
