//! Admin API tests through the axum router.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::{Extension, Router};
use carepath_webhooks::store::{DeliveryStore, SubscriptionStore};
use carepath_webhooks::{webhooks_router, MemoryStore, WebhookConfig, WebhooksState};
use common::*;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let subscriptions: Arc<dyn SubscriptionStore> = store.clone();
    let deliveries: Arc<dyn DeliveryStore> = store.clone();
    let config = WebhookConfig::new(ENCRYPTION_KEY.to_vec());
    let router = webhooks_router(WebhooksState::new(subscriptions, deliveries, &config))
        .layer(Extension(TENANT_A));
    (router, store)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn create_body() -> Value {
    json!({
        "name": "CRM sync",
        "target_url": "https://crm.example.com/hooks",
        "subscribed_events": ["journey.stage_changed", "survey.completed"],
        "max_retries": 4,
    })
}

/// Test: Full subscription lifecycle over HTTP.
#[tokio::test]
async fn test_subscription_lifecycle() {
    let (app, _) = app();

    let (status, created) = send(&app, Method::POST, "/webhooks/subscriptions", Some(create_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["is_active"], false);
    assert_eq!(created["max_retries"], 4);
    assert_eq!(created["retry_delay_seconds"], 60);
    let secret = created["secret"].as_str().unwrap().to_string();
    assert!(secret.starts_with("whsec_"));
    let id = created["id"].as_str().unwrap().to_string();

    let (status, fetched) = send(&app, Method::GET, &format!("/webhooks/subscriptions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(fetched.get("secret").is_none());

    let (status, activated) = send(
        &app,
        Method::POST,
        &format!("/webhooks/subscriptions/{id}/activate"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activated["is_active"], true);

    let (status, updated) = send(
        &app,
        Method::PATCH,
        &format!("/webhooks/subscriptions/{id}"),
        Some(json!({ "name": "CRM sync v2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "CRM sync v2");
    assert_eq!(updated["is_active"], true);

    let (status, rotated) = send(
        &app,
        Method::POST,
        &format!("/webhooks/subscriptions/{id}/rotate-secret"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(rotated["secret"].as_str().unwrap(), secret);

    let (status, list) = send(&app, Method::GET, "/webhooks/subscriptions?is_active=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);

    let (status, _) = send(&app, Method::DELETE, &format!("/webhooks/subscriptions/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, Method::GET, &format!("/webhooks/subscriptions/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "subscription_not_found");
    assert_eq!(body["status"], 404);
}

/// Test: Validation failures render as 400 JSON errors.
#[tokio::test]
async fn test_validation_errors() {
    let (app, _) = app();

    let mut body = create_body();
    body["target_url"] = json!("http://crm.example.com/hooks");
    let (status, error) = send(&app, Method::POST, "/webhooks/subscriptions", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "invalid_url");

    let mut body = create_body();
    body["target_url"] = json!("https://10.1.2.3/hooks");
    let (status, error) = send(&app, Method::POST, "/webhooks/subscriptions", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "ssrf_detected");

    let mut body = create_body();
    body["subscribed_events"] = json!(["user.created"]);
    let (status, error) = send(&app, Method::POST, "/webhooks/subscriptions", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "validation_error");
}

/// Test: The event type catalogue lists every tag.
#[tokio::test]
async fn test_list_event_types() {
    let (app, _) = app();

    let (status, body) = send(&app, Method::GET, "/webhooks/event-types", None).await;
    assert_eq!(status, StatusCode::OK);
    let tags: Vec<&str> = body["event_types"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(tags.len(), 6);
    assert!(tags.contains(&"journey.stage_changed"));
    assert!(tags.contains(&"churn_risk.calculated"));
}

/// Test: Delivery history and replay routes.
#[tokio::test]
async fn test_delivery_routes() {
    let (app, store) = app();

    let (_, created) = send(&app, Method::POST, "/webhooks/subscriptions", Some(create_body())).await;
    let id = created["id"].as_str().unwrap().to_string();
    send(
        &app,
        Method::POST,
        &format!("/webhooks/subscriptions/{id}/activate"),
        None,
    )
    .await;

    let publisher = carepath_webhooks::EventPublisher::new(store.clone(), store.clone());
    let receipt = publisher
        .publish_event(TENANT_A, &stage_changed_event())
        .await
        .unwrap();
    let delivery_id = receipt.delivery_ids[0];

    let (status, list) = send(
        &app,
        Method::GET,
        &format!("/webhooks/subscriptions/{id}/deliveries?status=pending"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);
    assert_eq!(list["items"][0]["status"], "pending");

    let (status, detail) = send(
        &app,
        Method::GET,
        &format!("/webhooks/subscriptions/{id}/deliveries/{delivery_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["event_type"], "journey.stage_changed");
    assert!(detail["payload_json"].as_str().unwrap().contains("event_id"));

    let (status, error) = send(
        &app,
        Method::POST,
        &format!("/webhooks/subscriptions/{id}/deliveries/{delivery_id}/replay"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "delivery_not_replayable");

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/webhooks/subscriptions/{}/deliveries", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, error) = send(
        &app,
        Method::GET,
        &format!("/webhooks/subscriptions/{id}/deliveries?status=bogus"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "validation_error");
}
