//! Webhook subscription record.

use std::collections::BTreeSet;

use carepath_core::{SubscriptionId, TenantAware, TenantId};
use chrono::{DateTime, Utc};

use crate::events::WebhookEventType;
use crate::retry::RetryPolicy;

/// A registered endpoint, the events it wants and its retry budget.
///
/// The signing secret is only ever held encrypted. Subscriptions are created
/// inactive and must be activated before the publisher sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSubscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub target_url: String,
    /// AES-256-GCM ciphertext of the signing secret.
    pub secret_encrypted: String,
    pub subscribed_events: BTreeSet<WebhookEventType>,
    pub is_active: bool,
    pub max_retries: u32,
    pub retry_delay_seconds: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn new(
        tenant_id: TenantId,
        name: String,
        target_url: String,
        secret_encrypted: String,
        subscribed_events: BTreeSet<WebhookEventType>,
        retry_policy: RetryPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            tenant_id,
            name,
            description: None,
            target_url,
            secret_encrypted,
            subscribed_events,
            is_active: false,
            max_retries: retry_policy.max_retries,
            retry_delay_seconds: retry_policy.retry_delay_seconds,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn is_subscribed_to(&self, event_type: WebhookEventType) -> bool {
        self.subscribed_events.contains(&event_type)
    }

    /// Whether the publisher should fan an event out to this subscription.
    pub fn receives(&self, tenant_id: TenantId, event_type: WebhookEventType) -> bool {
        self.is_active && self.belongs_to(tenant_id) && self.is_subscribed_to(event_type)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay_seconds: self.retry_delay_seconds,
        }
    }

    pub fn set_active(&mut self, active: bool, now: DateTime<Utc>) {
        self.is_active = active;
        self.updated_at = now;
    }

    /// Replace the signing secret. The old one stops being used immediately.
    pub fn replace_secret(&mut self, secret_encrypted: String, now: DateTime<Utc>) {
        self.secret_encrypted = secret_encrypted;
        self.updated_at = now;
    }
}

impl TenantAware for WebhookSubscription {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(events: &[WebhookEventType]) -> WebhookSubscription {
        WebhookSubscription::new(
            TenantId::new(),
            "CRM sync".into(),
            "https://hooks.example.com/carepath".into(),
            "ciphertext".into(),
            events.iter().copied().collect(),
            RetryPolicy::default(),
            Utc::now(),
        )
    }

    #[test]
    fn test_created_inactive() {
        let sub = subscription(&[WebhookEventType::SurveyCompleted]);
        assert!(!sub.is_active);
        assert!(!sub.receives(sub.tenant_id, WebhookEventType::SurveyCompleted));
    }

    #[test]
    fn test_receives_requires_tenant_event_and_active() {
        let mut sub = subscription(&[WebhookEventType::SurveyCompleted]);
        sub.set_active(true, Utc::now());

        assert!(sub.receives(sub.tenant_id, WebhookEventType::SurveyCompleted));
        assert!(!sub.receives(sub.tenant_id, WebhookEventType::JourneyStageChanged));
        assert!(!sub.receives(TenantId::new(), WebhookEventType::SurveyCompleted));
    }

    #[test]
    fn test_retry_policy_from_fields() {
        let mut sub = subscription(&[WebhookEventType::PatientRegistered]);
        sub.max_retries = 5;
        sub.retry_delay_seconds = 10;
        assert_eq!(
            sub.retry_policy(),
            RetryPolicy {
                max_retries: 5,
                retry_delay_seconds: 10
            }
        );
    }
}
