//! Single delivery attempt: sign, POST, classify.
//!
//! The dispatcher never touches storage. It takes a claimed delivery and its
//! subscription, performs at most one HTTP call and returns the delivery with
//! its next state applied. Persisting that state is the scheduler's job.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;

use crate::crypto;
use crate::error::WebhookError;
use crate::models::{AttemptRecord, WebhookDelivery, WebhookSubscription};
use crate::retry::{BackoffStrategy, RetryDecision};

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Delivery-Id";
pub const ATTEMPT_HEADER: &str = "X-Webhook-Attempt";

pub const INACTIVE_SUBSCRIPTION_ERROR: &str = "subscription inactive";

const USER_AGENT: &str = concat!("carepath-webhooks/", env!("CARGO_PKG_VERSION"));

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered,
    Retrying,
    Failed,
    /// The delivery was already terminal; nothing was done.
    Skipped,
}

/// The delivery after the attempt, and what happened.
#[derive(Debug, Clone)]
pub struct AttemptResult {
    pub delivery: WebhookDelivery,
    pub outcome: AttemptOutcome,
    /// Whether an HTTP request was sent.
    pub dispatched: bool,
}

/// Performs signed HTTP delivery attempts.
#[derive(Clone)]
pub struct Dispatcher {
    http_client: Client,
    encryption_key: Vec<u8>,
    backoff: BackoffStrategy,
    request_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher whose requests time out after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(encryption_key: Vec<u8>, request_timeout: Duration) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            encryption_key,
            backoff: BackoffStrategy::default(),
            request_timeout,
        })
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn backoff(&self) -> BackoffStrategy {
        self.backoff
    }

    /// Run one attempt of `delivery` against `subscription` at `now`.
    ///
    /// An inactive subscription or an unreadable secret fails the delivery
    /// without an HTTP call and without consuming an attempt.
    pub async fn attempt(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        now: DateTime<Utc>,
    ) -> AttemptResult {
        let mut delivery = delivery.clone();

        if delivery.is_terminal() {
            return AttemptResult {
                delivery,
                outcome: AttemptOutcome::Skipped,
                dispatched: false,
            };
        }

        if !subscription.is_active {
            tracing::info!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                subscription_id = %subscription.id,
                tenant_id = %delivery.tenant_id,
                "Subscription inactive, failing delivery"
            );
            return fail_without_attempt(delivery, INACTIVE_SUBSCRIPTION_ERROR, now);
        }

        // The secret is captured here, before the request is built; a rotation
        // racing with this attempt only affects later attempts.
        let decrypted = crypto::decrypt_secret(&subscription.secret_encrypted, &self.encryption_key);
        let secret = match decrypted {
            Ok(secret) => secret,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to decrypt subscription secret"
                );
                return fail_without_attempt(delivery, "signing secret unavailable", now);
            }
        };

        let attempt_number = match delivery.begin_attempt() {
            Ok(n) => n,
            Err(_) => {
                return AttemptResult {
                    delivery,
                    outcome: AttemptOutcome::Skipped,
                    dispatched: false,
                }
            }
        };

        let body = delivery.payload_json.clone().into_bytes();
        let headers = build_headers(&delivery, &secret, &body, attempt_number);

        let start = Instant::now();
        let result = self
            .http_client
            .post(&delivery.target_url)
            .headers(headers)
            .body(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                Ok((status_code, body))
            }
            Err(e) => Err(e),
        };
        let elapsed = start.elapsed();
        let latency_ms = u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX);
        let finished_at =
            now + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());

        match response {
            Ok((status_code, body)) if (200..300).contains(&status_code) => {
                tracing::info!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    subscription_id = %subscription.id,
                    tenant_id = %delivery.tenant_id,
                    event_id = %delivery.event_id,
                    event_type = %delivery.event_type,
                    response_code = status_code,
                    latency_ms,
                    attempt_number,
                    "Webhook delivery succeeded"
                );
                match delivery.mark_delivered(status_code, Some(body), latency_ms, finished_at) {
                    Ok(()) => AttemptResult {
                        delivery,
                        outcome: AttemptOutcome::Delivered,
                        dispatched: true,
                    },
                    Err(_) => AttemptResult {
                        delivery,
                        outcome: AttemptOutcome::Skipped,
                        dispatched: true,
                    },
                }
            }
            Ok((status_code, body)) => self.apply_failure(
                delivery,
                subscription,
                AttemptRecord {
                    status_code: Some(status_code),
                    response_body: Some(body),
                    error_message: format!("HTTP {status_code}"),
                    latency_ms: Some(latency_ms),
                },
                finished_at,
            ),
            Err(e) => {
                let error_message = if e.is_timeout() {
                    format!("Request timeout ({}s)", self.request_timeout.as_secs_f64())
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    format!("Request error: {e}")
                };
                self.apply_failure(
                    delivery,
                    subscription,
                    AttemptRecord {
                        status_code: None,
                        response_body: None,
                        error_message,
                        latency_ms: Some(latency_ms),
                    },
                    finished_at,
                )
            }
        }
    }

    fn apply_failure(
        &self,
        mut delivery: WebhookDelivery,
        subscription: &WebhookSubscription,
        attempt: AttemptRecord,
        now: DateTime<Utc>,
    ) -> AttemptResult {
        let error_message = attempt.error_message.clone();
        let decision = subscription
            .retry_policy()
            .decide(delivery.attempt_count, self.backoff, now);

        let (applied, outcome) = match decision {
            RetryDecision::RetryAt(next_retry_at) => {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    subscription_id = %subscription.id,
                    tenant_id = %delivery.tenant_id,
                    attempt_number = delivery.attempt_count,
                    max_retries = subscription.max_retries,
                    next_retry_at = %next_retry_at,
                    error = %error_message,
                    "Webhook delivery failed, scheduling retry"
                );
                (
                    delivery.mark_retrying(attempt, next_retry_at, now),
                    AttemptOutcome::Retrying,
                )
            }
            RetryDecision::Exhausted => {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    subscription_id = %subscription.id,
                    tenant_id = %delivery.tenant_id,
                    attempt_number = delivery.attempt_count,
                    error = %error_message,
                    "Webhook delivery failed, retry budget exhausted"
                );
                (delivery.mark_failed(attempt, now), AttemptOutcome::Failed)
            }
        };

        AttemptResult {
            delivery,
            outcome: if applied.is_ok() {
                outcome
            } else {
                AttemptOutcome::Skipped
            },
            dispatched: true,
        }
    }
}

fn fail_without_attempt(
    mut delivery: WebhookDelivery,
    reason: &str,
    now: DateTime<Utc>,
) -> AttemptResult {
    let outcome = match delivery.mark_failed(AttemptRecord::classification(reason), now) {
        Ok(()) => AttemptOutcome::Failed,
        Err(_) => AttemptOutcome::Skipped,
    };
    AttemptResult {
        delivery,
        outcome,
        dispatched: false,
    }
}

fn build_headers(
    delivery: &WebhookDelivery,
    secret: &str,
    body: &[u8],
    attempt_number: u32,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        EVENT_HEADER,
        HeaderValue::from_static(delivery.event_type.as_str()),
    );
    // Hex digests, UUIDs and integers are always valid header values.
    if let Ok(v) = HeaderValue::from_str(&crypto::signature_header_value(secret, body)) {
        headers.insert(SIGNATURE_HEADER, v);
    }
    if let Ok(v) = HeaderValue::from_str(&delivery.id.to_string()) {
        headers.insert(DELIVERY_ID_HEADER, v);
    }
    headers.insert(ATTEMPT_HEADER, HeaderValue::from(attempt_number));
    headers
}
