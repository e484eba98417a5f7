//! Integration tests for event fan-out.
//!
//! Publishing only enqueues: one pending delivery per active, matching
//! subscription of the publishing tenant, and no HTTP traffic.

mod common;

use carepath_core::TenantId;
use carepath_webhooks::{DeliveryStatus, WebhookError, WebhookEventType, WebhookPayload};
use common::*;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer};

/// Test: One matching subscription yields exactly one pending delivery.
#[tokio::test]
async fn test_publish_creates_one_pending_delivery() {
    let harness = Harness::new();
    let (sub_id, _) = harness
        .subscribe(
            TENANT_A,
            "http://127.0.0.1:9/hook",
            &[WebhookEventType::JourneyStageChanged],
            3,
            60,
        )
        .await;

    let receipt = harness
        .publisher
        .publish_event(TENANT_A, &stage_changed_event())
        .await
        .unwrap();

    assert_eq!(receipt.delivery_count(), 1);
    let delivery = harness.delivery(TENANT_A, receipt.delivery_ids[0]).await;
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.attempt_count, 0);
    assert_eq!(delivery.subscription_id, sub_id);
    assert_eq!(delivery.event_id, receipt.event_id);
    assert_eq!(delivery.target_url, "http://127.0.0.1:9/hook");
    assert!(delivery.next_retry_at.is_none());
}

/// Test: Only the subscription that wants the event receives it.
#[tokio::test]
async fn test_publish_filters_by_event_type() {
    let harness = Harness::new();
    harness
        .subscribe(
            TENANT_A,
            "http://127.0.0.1:9/surveys",
            &[WebhookEventType::SurveyCompleted],
            3,
            60,
        )
        .await;
    let (journey_sub, _) = harness
        .subscribe(
            TENANT_A,
            "http://127.0.0.1:9/journeys",
            &[WebhookEventType::JourneyStageChanged],
            3,
            60,
        )
        .await;

    let receipt = harness
        .publisher
        .publish_event(TENANT_A, &stage_changed_event())
        .await
        .unwrap();

    assert_eq!(receipt.delivery_count(), 1);
    let all = harness.store.all_deliveries().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].subscription_id, journey_sub);
}

/// Test: Fan-out count equals the number of active, matching, same-tenant subscriptions.
#[tokio::test]
async fn test_fan_out_matches_subscription_set() {
    let harness = Harness::new();
    let events = [
        WebhookEventType::JourneyStageChanged,
        WebhookEventType::SurveyCompleted,
    ];

    // Three matching, active subscriptions for tenant A.
    for i in 0..3 {
        harness
            .subscribe(TENANT_A, &format!("http://127.0.0.1:9/a{i}"), &events, 3, 60)
            .await;
    }
    // Same events, other tenant.
    harness
        .subscribe(TENANT_B, "http://127.0.0.1:9/b", &events, 3, 60)
        .await;
    // Matching but deactivated.
    let (inactive, _) = harness
        .subscribe(TENANT_A, "http://127.0.0.1:9/off", &events, 3, 60)
        .await;
    harness
        .subscriptions
        .deactivate_subscription(TENANT_A, inactive)
        .await
        .unwrap();
    // Active but not interested.
    harness
        .subscribe(
            TENANT_A,
            "http://127.0.0.1:9/other",
            &[WebhookEventType::AppointmentCancelled],
            3,
            60,
        )
        .await;

    let receipt = harness
        .publisher
        .publish_event(TENANT_A, &survey_completed_event())
        .await
        .unwrap();

    assert_eq!(receipt.delivery_count(), 3);
    let all = harness.store.all_deliveries().await;
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|d| d.tenant_id == TENANT_A));
    assert!(all.iter().all(|d| d.subscription_id != inactive));
}

/// Test: Freshly created subscriptions are inactive and receive nothing.
#[tokio::test]
async fn test_new_subscription_receives_nothing_until_activated() {
    let harness = Harness::new();
    harness
        .subscriptions
        .create_subscription(
            TENANT_A,
            carepath_webhooks::models::CreateSubscriptionRequest {
                name: "pending activation".to_string(),
                description: None,
                target_url: "http://127.0.0.1:9/hook".to_string(),
                subscribed_events: vec!["patient.registered".to_string()],
                max_retries: None,
                retry_delay_seconds: None,
            },
        )
        .await
        .unwrap();

    let receipt = harness
        .publisher
        .publish_event(TENANT_A, &patient_registered_event())
        .await
        .unwrap();

    assert_eq!(receipt.delivery_count(), 0);
}

/// Test: Zero matches is a no-op, not an error, and sends nothing.
#[tokio::test]
async fn test_publish_without_subscribers_is_noop() {
    let mock_server = MockServer::start().await;
    let counter = CountingResponder::new();
    Mock::given(method("POST"))
        .respond_with(counter.clone())
        .mount(&mock_server)
        .await;

    let harness = Harness::new();
    let receipt = harness
        .publisher
        .publish_event(TENANT_A, &stage_changed_event())
        .await
        .unwrap();

    assert_eq!(receipt.delivery_count(), 0);
    assert!(harness.store.all_deliveries().await.is_empty());
    assert_eq!(counter.count(), 0);
}

/// Test: Publishing never performs network I/O.
#[tokio::test]
async fn test_publish_does_not_call_receiver() {
    let mock_server = MockServer::start().await;
    let counter = CountingResponder::new();
    Mock::given(method("POST"))
        .respond_with(counter.clone())
        .mount(&mock_server)
        .await;

    let harness = Harness::new();
    harness
        .subscribe(
            TENANT_A,
            &format!("{}/hook", mock_server.uri()),
            &[WebhookEventType::JourneyStageChanged],
            3,
            60,
        )
        .await;

    harness
        .publisher
        .publish_event(TENANT_A, &stage_changed_event())
        .await
        .unwrap();

    assert_eq!(counter.count(), 0);
}

/// Test: All deliveries of one event share the same serialized envelope.
#[tokio::test]
async fn test_payload_serialized_once_per_event() {
    let harness = Harness::new();
    for i in 0..2 {
        harness
            .subscribe(
                TENANT_A,
                &format!("http://127.0.0.1:9/{i}"),
                &[WebhookEventType::JourneyStageChanged],
                3,
                60,
            )
            .await;
    }

    let receipt = harness
        .publisher
        .publish_event(TENANT_A, &stage_changed_event())
        .await
        .unwrap();

    let all = harness.store.all_deliveries().await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].payload_json, all[1].payload_json);

    let payload: WebhookPayload = serde_json::from_str(&all[0].payload_json).unwrap();
    assert_eq!(payload.event_id, receipt.event_id);
    assert_eq!(payload.event_type, WebhookEventType::JourneyStageChanged);
    assert_eq!(payload.tenant_id, TENANT_A);
    assert_eq!(payload.data["to_stage"], "active");
}

/// Test: An empty tenant is rejected before touching the store.
#[tokio::test]
async fn test_publish_rejects_nil_tenant() {
    let harness = Harness::new();
    let err = harness
        .publisher
        .publish_event(TenantId::from_uuid(uuid::Uuid::nil()), &stage_changed_event())
        .await
        .unwrap_err();

    assert!(matches!(err, WebhookError::Validation(_)));
}

/// Test: A store failure during fan-out surfaces to the caller.
#[tokio::test]
async fn test_publish_surfaces_store_errors() {
    let harness = Harness::new();
    harness
        .subscribe(
            TENANT_A,
            "http://127.0.0.1:9/hook",
            &[WebhookEventType::JourneyStageChanged],
            3,
            60,
        )
        .await;
    harness.store.set_unavailable(true);

    let err = harness
        .publisher
        .publish_event(TENANT_A, &stage_changed_event())
        .await
        .unwrap_err();

    assert!(matches!(err, WebhookError::Store(_)));
    assert!(err.is_transient());
}
