//! CRUD handlers for webhook subscriptions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use carepath_core::{SubscriptionId, TenantId};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::events::WebhookEventType;
use crate::models::{
    CreateSubscriptionRequest, CreatedSubscriptionResponse, EventTypeInfo, EventTypeListResponse,
    ListSubscriptionsQuery, SecretRotatedResponse, SubscriptionListResponse,
    SubscriptionResponse, UpdateSubscriptionRequest,
};
use crate::router::WebhooksState;

// ---------------------------------------------------------------------------
// Subscription CRUD handlers
// ---------------------------------------------------------------------------

/// Create a new webhook subscription.
///
/// The subscription starts inactive. The signing secret is returned only here.
#[utoipa::path(
    post,
    path = "/webhooks/subscriptions",
    tag = "Webhooks",
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 201, description = "Subscription created", body = CreatedSubscriptionResponse),
        (status = 400, description = "Validation error"),
        (status = 409, description = "Subscription limit exceeded"),
    )
)]
pub async fn create_subscription_handler(
    State(state): State<WebhooksState>,
    Extension(tenant_id): Extension<TenantId>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> ApiResult<(StatusCode, Json<CreatedSubscriptionResponse>)> {
    let response = state
        .subscription_service
        .create_subscription(tenant_id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// List webhook subscriptions.
#[utoipa::path(
    get,
    path = "/webhooks/subscriptions",
    tag = "Webhooks",
    params(ListSubscriptionsQuery),
    responses(
        (status = 200, description = "Paginated subscription list", body = SubscriptionListResponse),
    )
)]
pub async fn list_subscriptions_handler(
    State(state): State<WebhooksState>,
    Extension(tenant_id): Extension<TenantId>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> ApiResult<Json<SubscriptionListResponse>> {
    let response = state
        .subscription_service
        .list_subscriptions(tenant_id, query)
        .await?;

    Ok(Json(response))
}

/// Get a single webhook subscription.
#[utoipa::path(
    get,
    path = "/webhooks/subscriptions/{id}",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 200, description = "Subscription details", body = SubscriptionResponse),
        (status = 404, description = "Subscription not found"),
    )
)]
pub async fn get_subscription_handler(
    State(state): State<WebhooksState>,
    Extension(tenant_id): Extension<TenantId>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let response = state
        .subscription_service
        .get_subscription(tenant_id, SubscriptionId::from_uuid(id))
        .await?;

    Ok(Json(response))
}

/// Update a webhook subscription.
#[utoipa::path(
    patch,
    path = "/webhooks/subscriptions/{id}",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    request_body = UpdateSubscriptionRequest,
    responses(
        (status = 200, description = "Subscription updated", body = SubscriptionResponse),
        (status = 400, description = "Validation error"),
        (status = 404, description = "Subscription not found"),
    )
)]
pub async fn update_subscription_handler(
    State(state): State<WebhooksState>,
    Extension(tenant_id): Extension<TenantId>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let response = state
        .subscription_service
        .update_subscription(tenant_id, SubscriptionId::from_uuid(id), request)
        .await?;

    Ok(Json(response))
}

/// Delete a webhook subscription.
#[utoipa::path(
    delete,
    path = "/webhooks/subscriptions/{id}",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 204, description = "Subscription deleted"),
        (status = 404, description = "Subscription not found"),
    )
)]
pub async fn delete_subscription_handler(
    State(state): State<WebhooksState>,
    Extension(tenant_id): Extension<TenantId>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .subscription_service
        .delete_subscription(tenant_id, SubscriptionId::from_uuid(id))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Lifecycle handlers
// ---------------------------------------------------------------------------

/// Activate a subscription so it starts receiving events.
#[utoipa::path(
    post,
    path = "/webhooks/subscriptions/{id}/activate",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 200, description = "Subscription activated", body = SubscriptionResponse),
        (status = 404, description = "Subscription not found"),
    )
)]
pub async fn activate_subscription_handler(
    State(state): State<WebhooksState>,
    Extension(tenant_id): Extension<TenantId>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let response = state
        .subscription_service
        .activate_subscription(tenant_id, SubscriptionId::from_uuid(id))
        .await?;

    Ok(Json(response))
}

/// Deactivate a subscription. Queued deliveries fail on their next attempt.
#[utoipa::path(
    post,
    path = "/webhooks/subscriptions/{id}/deactivate",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 200, description = "Subscription deactivated", body = SubscriptionResponse),
        (status = 404, description = "Subscription not found"),
    )
)]
pub async fn deactivate_subscription_handler(
    State(state): State<WebhooksState>,
    Extension(tenant_id): Extension<TenantId>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let response = state
        .subscription_service
        .deactivate_subscription(tenant_id, SubscriptionId::from_uuid(id))
        .await?;

    Ok(Json(response))
}

/// Generate a new signing secret. The previous one stops validating at once.
#[utoipa::path(
    post,
    path = "/webhooks/subscriptions/{id}/rotate-secret",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 200, description = "Secret rotated", body = SecretRotatedResponse),
        (status = 404, description = "Subscription not found"),
    )
)]
pub async fn rotate_secret_handler(
    State(state): State<WebhooksState>,
    Extension(tenant_id): Extension<TenantId>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SecretRotatedResponse>> {
    let response = state
        .subscription_service
        .rotate_secret(tenant_id, SubscriptionId::from_uuid(id))
        .await?;

    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Event types handler
// ---------------------------------------------------------------------------

/// List all supported webhook event types.
#[utoipa::path(
    get,
    path = "/webhooks/event-types",
    tag = "Webhooks",
    responses(
        (status = 200, description = "List of event types", body = EventTypeListResponse),
    )
)]
pub async fn list_event_types_handler() -> Json<EventTypeListResponse> {
    let event_types = WebhookEventType::all()
        .iter()
        .copied()
        .map(EventTypeInfo::from)
        .collect();
    Json(EventTypeListResponse { event_types })
}
