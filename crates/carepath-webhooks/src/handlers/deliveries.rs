//! Delivery history and replay handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use carepath_core::{DeliveryId, SubscriptionId, TenantId};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{
    DeliveryDetailResponse, DeliveryListResponse, DeliveryResponse, ListDeliveriesQuery,
};
use crate::router::WebhooksState;

/// List deliveries for a subscription, newest first.
#[utoipa::path(
    get,
    path = "/webhooks/subscriptions/{id}/deliveries",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID"),
        ListDeliveriesQuery,
    ),
    responses(
        (status = 200, description = "Paginated delivery list", body = DeliveryListResponse),
        (status = 400, description = "Unknown status filter"),
        (status = 404, description = "Subscription not found"),
    )
)]
pub async fn list_deliveries_handler(
    State(state): State<WebhooksState>,
    Extension(tenant_id): Extension<TenantId>,
    Path(subscription_id): Path<Uuid>,
    Query(query): Query<ListDeliveriesQuery>,
) -> ApiResult<Json<DeliveryListResponse>> {
    let response = state
        .delivery_service
        .list_deliveries(tenant_id, SubscriptionId::from_uuid(subscription_id), query)
        .await?;

    Ok(Json(response))
}

/// Get a single delivery including payload and last response body.
#[utoipa::path(
    get,
    path = "/webhooks/subscriptions/{id}/deliveries/{delivery_id}",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID"),
        ("delivery_id" = Uuid, Path, description = "Delivery ID"),
    ),
    responses(
        (status = 200, description = "Delivery details", body = DeliveryDetailResponse),
        (status = 404, description = "Delivery not found"),
    )
)]
pub async fn get_delivery_handler(
    State(state): State<WebhooksState>,
    Extension(tenant_id): Extension<TenantId>,
    Path((subscription_id, delivery_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<DeliveryDetailResponse>> {
    let response = state
        .delivery_service
        .get_delivery(
            tenant_id,
            SubscriptionId::from_uuid(subscription_id),
            DeliveryId::from_uuid(delivery_id),
        )
        .await?;

    Ok(Json(response))
}

/// Re-enqueue a failed delivery as a new pending one.
#[utoipa::path(
    post,
    path = "/webhooks/subscriptions/{id}/deliveries/{delivery_id}/replay",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID"),
        ("delivery_id" = Uuid, Path, description = "Delivery ID"),
    ),
    responses(
        (status = 202, description = "Replay enqueued", body = DeliveryResponse),
        (status = 404, description = "Subscription or delivery not found"),
        (status = 409, description = "Delivery not failed or subscription inactive"),
    )
)]
pub async fn replay_delivery_handler(
    State(state): State<WebhooksState>,
    Extension(tenant_id): Extension<TenantId>,
    Path((subscription_id, delivery_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<(StatusCode, Json<DeliveryResponse>)> {
    let response = state
        .delivery_service
        .replay_delivery(
            tenant_id,
            SubscriptionId::from_uuid(subscription_id),
            DeliveryId::from_uuid(delivery_id),
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}
