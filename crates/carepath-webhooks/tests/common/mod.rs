//! Common test utilities for carepath-webhooks integration tests.
//!
//! Provides mock receivers, an in-memory harness wiring publisher, scheduler
//! and admin services together, and event fixtures. No database is required.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use carepath_core::{DeliveryId, SubscriptionId, TenantId};
use carepath_webhooks::events::{
    JourneyStageChanged, PatientRegistered, SurveyCompleted, WebhookEvent,
};
use carepath_webhooks::models::{CreateSubscriptionRequest, DeliveryStatus};
use carepath_webhooks::store::{DeliveryStore, MemoryStore, StoreError, SubscriptionStore};
use carepath_webhooks::validation::UrlPolicy;
use carepath_webhooks::{
    DeliveryService, Dispatcher, EventPublisher, RetryScheduler, SchedulerConfig,
    SubscriptionService, WebhookDelivery, WebhookEventType, WebhookSubscription,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

pub const TENANT_A: TenantId = TenantId::from_uuid(Uuid::from_bytes([
    0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
]));

pub const TENANT_B: TenantId = TenantId::from_uuid(Uuid::from_bytes([
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
]));

pub const PATIENT_1: Uuid = Uuid::from_bytes([
    0xaa, 0xaa, 0x11, 0x11, 0xaa, 0xaa, 0x11, 0x11, 0xaa, 0xaa, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
]);

/// AES-256 key used to encrypt signing secrets in tests.
pub const ENCRYPTION_KEY: [u8; 32] = [0x42; 32];

/// Local mock servers listen on plain HTTP at 127.0.0.1.
pub const LOCAL_POLICY: UrlPolicy = UrlPolicy {
    allow_http: true,
    allow_private_targets: true,
};

pub fn stage_changed_event() -> WebhookEvent {
    WebhookEvent::JourneyStageChanged(JourneyStageChanged {
        patient_id: PATIENT_1,
        journey_id: Uuid::new_v4(),
        from_stage: Some("onboarding".to_string()),
        to_stage: "active".to_string(),
        changed_at: Utc::now(),
    })
}

pub fn survey_completed_event() -> WebhookEvent {
    WebhookEvent::SurveyCompleted(SurveyCompleted {
        patient_id: PATIENT_1,
        survey_id: Uuid::new_v4(),
        response_id: Uuid::new_v4(),
        score: Some(9.0),
        completed_at: Utc::now(),
    })
}

pub fn patient_registered_event() -> WebhookEvent {
    WebhookEvent::PatientRegistered(PatientRegistered {
        patient_id: PATIENT_1,
        source: Some("referral".to_string()),
        registered_at: Utc::now(),
    })
}

/// `base + secs` seconds.
pub fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    base + chrono::Duration::seconds(secs)
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Publisher, scheduler and admin services over one in-memory store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub publisher: EventPublisher,
    pub subscriptions: SubscriptionService,
    pub deliveries: DeliveryService,
    pub scheduler: RetryScheduler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(SchedulerConfig::default(), Duration::from_secs(5))
    }

    pub fn with_options(config: SchedulerConfig, request_timeout: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_stores(store.clone(), store, config, request_timeout)
    }

    /// Use `deliveries` for the delivery side while subscriptions and
    /// inspection go through `store`.
    pub fn with_stores(
        store: Arc<MemoryStore>,
        deliveries: Arc<dyn DeliveryStore>,
        config: SchedulerConfig,
        request_timeout: Duration,
    ) -> Self {
        let subscriptions: Arc<dyn SubscriptionStore> = store.clone();
        let dispatcher = Dispatcher::new(ENCRYPTION_KEY.to_vec(), request_timeout)
            .expect("build dispatcher")
            .with_backoff(config.backoff);

        Self {
            publisher: EventPublisher::new(subscriptions.clone(), deliveries.clone()),
            subscriptions: SubscriptionService::new(
                subscriptions.clone(),
                ENCRYPTION_KEY.to_vec(),
            )
            .with_url_policy(LOCAL_POLICY),
            deliveries: DeliveryService::new(subscriptions.clone(), deliveries.clone()),
            scheduler: RetryScheduler::new(
                subscriptions,
                deliveries,
                Arc::new(dispatcher),
                config,
            ),
            store,
        }
    }

    /// Create and activate a subscription. Returns its id and plaintext secret.
    pub async fn subscribe(
        &self,
        tenant_id: TenantId,
        target_url: &str,
        events: &[WebhookEventType],
        max_retries: u32,
        retry_delay_seconds: u32,
    ) -> (SubscriptionId, String) {
        let created = self
            .subscriptions
            .create_subscription(
                tenant_id,
                CreateSubscriptionRequest {
                    name: format!("receiver {target_url}"),
                    description: None,
                    target_url: target_url.to_string(),
                    subscribed_events: events.iter().map(|e| e.as_str().to_string()).collect(),
                    max_retries: Some(max_retries),
                    retry_delay_seconds: Some(retry_delay_seconds),
                },
            )
            .await
            .expect("create subscription");
        let id = SubscriptionId::from_uuid(created.subscription.id);
        self.subscriptions
            .activate_subscription(tenant_id, id)
            .await
            .expect("activate subscription");
        (id, created.secret)
    }

    pub async fn subscription(&self, tenant_id: TenantId, id: SubscriptionId) -> WebhookSubscription {
        self.store
            .find_subscription(tenant_id, id)
            .await
            .expect("store available")
            .expect("subscription exists")
    }

    pub async fn delivery(&self, tenant_id: TenantId, id: DeliveryId) -> WebhookDelivery {
        self.store
            .find_delivery(tenant_id, id)
            .await
            .expect("store available")
            .expect("delivery exists")
    }

    pub async fn deliveries_with_status(&self, status: DeliveryStatus) -> Vec<WebhookDelivery> {
        self.store
            .all_deliveries()
            .await
            .into_iter()
            .filter(|d| d.status == status)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// FlakyDeliveryStore - delivery store whose writes can be made to fail
// ---------------------------------------------------------------------------

/// Delegates to a [`MemoryStore`] but can fail `complete_attempt` on demand.
pub struct FlakyDeliveryStore {
    inner: Arc<MemoryStore>,
    fail_complete: AtomicBool,
    releases: AtomicU32,
}

impl FlakyDeliveryStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_complete: AtomicBool::new(false),
            releases: AtomicU32::new(0),
        }
    }

    pub fn fail_completions(&self, fail: bool) {
        self.fail_complete.store(fail, Ordering::SeqCst);
    }

    pub fn release_count(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryStore for FlakyDeliveryStore {
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        self.inner.insert_delivery(delivery).await
    }

    async fn find_delivery(
        &self,
        tenant_id: TenantId,
        id: DeliveryId,
    ) -> Result<Option<WebhookDelivery>, StoreError> {
        self.inner.find_delivery(tenant_id, id).await
    }

    async fn list_deliveries(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        self.inner
            .list_deliveries(tenant_id, subscription_id, status, limit, offset)
            .await
    }

    async fn count_deliveries(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, StoreError> {
        self.inner
            .count_deliveries(tenant_id, subscription_id, status)
            .await
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        self.inner.claim_due(now, claim_until, limit).await
    }

    async fn complete_attempt(
        &self,
        delivery: &WebhookDelivery,
        expected_attempt_count: u32,
    ) -> Result<bool, StoreError> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }
        self.inner
            .complete_attempt(delivery, expected_attempt_count)
            .await
    }

    async fn renew_claim(
        &self,
        id: DeliveryId,
        held_until: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.renew_claim(id, held_until, claim_until).await
    }

    async fn release_claim(&self, id: DeliveryId) -> Result<bool, StoreError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release_claim(id).await
    }
}

// ---------------------------------------------------------------------------
// SlowReadStore - subscription store with delayed reads
// ---------------------------------------------------------------------------

/// Delegates to a [`MemoryStore`], sleeping before every `find_subscription`
/// so read-modify-write sequences overlap with concurrent writers.
pub struct SlowReadStore {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

impl SlowReadStore {
    pub fn new(inner: Arc<MemoryStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl SubscriptionStore for SlowReadStore {
    async fn insert_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<(), StoreError> {
        self.inner.insert_subscription(subscription).await
    }

    async fn find_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<Option<WebhookSubscription>, StoreError> {
        let found = self.inner.find_subscription(tenant_id, id).await;
        tokio::time::sleep(self.delay).await;
        found
    }

    async fn find_active_by_event_type(
        &self,
        tenant_id: TenantId,
        event_type: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        self.inner
            .find_active_by_event_type(tenant_id, event_type)
            .await
    }

    async fn list_subscriptions(
        &self,
        tenant_id: TenantId,
        is_active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        self.inner
            .list_subscriptions(tenant_id, is_active, limit, offset)
            .await
    }

    async fn count_subscriptions(
        &self,
        tenant_id: TenantId,
        is_active: Option<bool>,
    ) -> Result<i64, StoreError> {
        self.inner.count_subscriptions(tenant_id, is_active).await
    }

    async fn update_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<bool, StoreError> {
        self.inner.update_subscription(subscription).await
    }

    async fn set_subscription_active(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner
            .set_subscription_active(tenant_id, id, active, now)
            .await
    }

    async fn replace_subscription_secret(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
        secret_encrypted: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner
            .replace_subscription_secret(tenant_id, id, secret_encrypted, now)
            .await
    }

    async fn delete_subscription(
        &self,
        tenant_id: TenantId,
        id: SubscriptionId,
    ) -> Result<bool, StoreError> {
        self.inner.delete_subscription(tenant_id, id).await
    }
}

// ---------------------------------------------------------------------------
// CapturedRequest - for inspecting webhook requests
// ---------------------------------------------------------------------------

/// A captured HTTP request with body and headers.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl CapturedRequest {
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns a fixed status
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
    delay: Option<Duration>,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
            delay: None,
        }
    }

    /// Respond only after `delay_ms`; the request is recorded on arrival.
    pub fn delayed(mut self, delay_ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(delay_ms));
        self
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
        };
        self.requests.lock().unwrap().push(captured);
        let template = ResponseTemplate::new(self.response_code).set_body_string("ack");
        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

// ---------------------------------------------------------------------------
// CountingResponder - counts requests
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CountingResponder {
    count: Arc<AtomicU32>,
    response_code: u16,
}

impl CountingResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
            response_code: status,
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for CountingResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.response_code)
    }
}

// ---------------------------------------------------------------------------
// FailingResponder - fails N times then succeeds
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_code: u16,
}

impl FailingResponder {
    /// Fail `n` times with 500, then return 200.
    pub fn fail_times(n: u32) -> Self {
        Self::fail_with_status(n, 500)
    }

    pub fn fail_with_status(n: u32, failure_code: u16) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_code,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_code).set_body_string("upstream unavailable")
        } else {
            ResponseTemplate::new(200)
        }
    }
}

// ---------------------------------------------------------------------------
// DelayedResponder - adds response delay
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DelayedResponder {
    delay_ms: u64,
    response_code: u16,
}

impl DelayedResponder {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            response_code: 200,
        }
    }
}

impl Respond for DelayedResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(self.response_code)
            .set_delay(Duration::from_millis(self.delay_ms))
    }
}

// ---------------------------------------------------------------------------
// Signature helpers
// ---------------------------------------------------------------------------

/// HMAC-SHA256 of `body` keyed by `secret`, computed independently of the crate.
pub fn compute_test_signature(secret: &str, body: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify the signature header of a captured request the way a receiver would.
pub fn verify_captured_signature(request: &CapturedRequest, secret: &str) -> bool {
    let Some(header) = request.header("x-webhook-signature") else {
        return false;
    };
    header == format!("sha256={}", compute_test_signature(secret, &request.body))
}
