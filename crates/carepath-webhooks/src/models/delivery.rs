//! Webhook delivery record and its state machine.
//!
//! ```text
//! Pending ──► Delivered
//!    │   └──► Failed      (inactive, missing subscription, exhausted budget)
//!    └──► Retrying ──► Delivered | Retrying | Failed
//! ```
//!
//! `Delivered` and `Failed` are terminal: every mutator refuses to touch a
//! terminal record, so its fields never change again.

use std::fmt;

use carepath_core::{DeliveryId, EventId, SubscriptionId, TenantAware, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::events::WebhookEventType;
use crate::models::WebhookSubscription;

/// Longest response body kept on a delivery, in characters.
pub const MAX_RESPONSE_BODY_CHARS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "retrying" => Some(Self::Retrying),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempted to mutate a delivery that already reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("delivery {id} is already {status}")]
pub struct DeliveryStateError {
    pub id: DeliveryId,
    pub status: DeliveryStatus,
}

/// One notification of one event to one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookDelivery {
    pub id: DeliveryId,
    pub subscription_id: SubscriptionId,
    pub tenant_id: TenantId,
    pub event_id: EventId,
    pub event_type: WebhookEventType,
    /// Request body, fixed at creation and sent byte-for-byte on every attempt.
    pub payload_json: String,
    /// Captured at creation; later subscription URL changes do not redirect it.
    pub target_url: String,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub response_status_code: Option<u16>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: Option<u32>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookDelivery {
    /// A fresh `Pending` delivery of `payload_json` to `subscription`.
    pub fn pending(
        subscription: &WebhookSubscription,
        event_id: EventId,
        event_type: WebhookEventType,
        payload_json: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            subscription_id: subscription.id,
            tenant_id: subscription.tenant_id,
            event_id,
            event_type,
            payload_json,
            target_url: subscription.target_url.clone(),
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            next_retry_at: None,
            delivered_at: None,
            failed_at: None,
            response_status_code: None,
            response_body: None,
            error_message: None,
            latency_ms: None,
            claimed_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Eligible for an attempt at `now`: pending, or retrying with its retry
    /// time elapsed, and not held by another worker.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let scheduled = match self.status {
            DeliveryStatus::Pending => true,
            DeliveryStatus::Retrying => self.next_retry_at.map_or(true, |at| at <= now),
            DeliveryStatus::Delivered | DeliveryStatus::Failed => false,
        };
        scheduled && self.claimed_until.map_or(true, |until| until <= now)
    }

    fn ensure_open(&self) -> Result<(), DeliveryStateError> {
        if self.is_terminal() {
            return Err(DeliveryStateError {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Count an outbound attempt. Returns the 1-based attempt number.
    pub fn begin_attempt(&mut self) -> Result<u32, DeliveryStateError> {
        self.ensure_open()?;
        self.attempt_count = self.attempt_count.saturating_add(1);
        Ok(self.attempt_count)
    }

    pub fn mark_delivered(
        &mut self,
        status_code: u16,
        response_body: Option<String>,
        latency_ms: u32,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryStateError> {
        self.ensure_open()?;
        self.status = DeliveryStatus::Delivered;
        self.response_status_code = Some(status_code);
        self.response_body = response_body.map(truncate_body);
        self.error_message = None;
        self.latency_ms = Some(latency_ms);
        self.next_retry_at = None;
        self.delivered_at = Some(now);
        self.claimed_until = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_retrying(
        &mut self,
        attempt: AttemptRecord,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryStateError> {
        self.ensure_open()?;
        self.status = DeliveryStatus::Retrying;
        self.apply_attempt(attempt);
        self.next_retry_at = Some(next_retry_at);
        self.claimed_until = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        attempt: AttemptRecord,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryStateError> {
        self.ensure_open()?;
        self.status = DeliveryStatus::Failed;
        self.apply_attempt(attempt);
        self.next_retry_at = None;
        self.failed_at = Some(now);
        self.claimed_until = None;
        self.updated_at = now;
        Ok(())
    }

    fn apply_attempt(&mut self, attempt: AttemptRecord) {
        // A classification-only failure (no HTTP call) keeps the last response.
        if attempt.status_code.is_some() || attempt.latency_ms.is_some() {
            self.response_status_code = attempt.status_code;
            self.response_body = attempt.response_body.map(truncate_body);
            self.latency_ms = attempt.latency_ms;
        }
        self.error_message = Some(attempt.error_message);
    }

    /// A new `Pending` copy of this delivery for manual redelivery.
    pub fn replay(&self, target_url: String, now: DateTime<Utc>) -> Self {
        Self {
            id: DeliveryId::new(),
            subscription_id: self.subscription_id,
            tenant_id: self.tenant_id,
            event_id: self.event_id,
            event_type: self.event_type,
            payload_json: self.payload_json.clone(),
            target_url,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            next_retry_at: None,
            delivered_at: None,
            failed_at: None,
            response_status_code: None,
            response_body: None,
            error_message: None,
            latency_ms: None,
            claimed_until: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl TenantAware for WebhookDelivery {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Diagnostics of a failed attempt or classification step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub error_message: String,
    pub latency_ms: Option<u32>,
}

impl AttemptRecord {
    /// A failure decided without contacting the endpoint.
    pub fn classification(error_message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            response_body: None,
            error_message: error_message.into(),
            latency_ms: None,
        }
    }
}

fn truncate_body(body: String) -> String {
    match body.char_indices().nth(MAX_RESPONSE_BODY_CHARS) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body,
    }
}
