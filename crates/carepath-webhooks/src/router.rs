//! Axum router setup for webhook endpoints.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::config::WebhookConfig;
use crate::handlers::{deliveries, subscriptions};
use crate::services::delivery_service::DeliveryService;
use crate::services::subscription_service::SubscriptionService;
use crate::store::{DeliveryStore, SubscriptionStore};

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct WebhooksState {
    pub subscription_service: Arc<SubscriptionService>,
    pub delivery_service: Arc<DeliveryService>,
}

impl WebhooksState {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
        config: &WebhookConfig,
    ) -> Self {
        Self {
            subscription_service: Arc::new(SubscriptionService::from_config(
                subscriptions.clone(),
                config,
            )),
            delivery_service: Arc::new(DeliveryService::new(subscriptions, deliveries)),
        }
    }
}

/// Creates the webhook router with all routes.
///
/// Handlers expect an `Extension<TenantId>` installed by outer middleware.
pub fn webhooks_router(state: WebhooksState) -> Router {
    Router::new()
        // Subscription CRUD
        .route(
            "/webhooks/subscriptions",
            post(subscriptions::create_subscription_handler)
                .get(subscriptions::list_subscriptions_handler),
        )
        .route(
            "/webhooks/subscriptions/:id",
            get(subscriptions::get_subscription_handler)
                .patch(subscriptions::update_subscription_handler)
                .delete(subscriptions::delete_subscription_handler),
        )
        // Lifecycle
        .route(
            "/webhooks/subscriptions/:id/activate",
            post(subscriptions::activate_subscription_handler),
        )
        .route(
            "/webhooks/subscriptions/:id/deactivate",
            post(subscriptions::deactivate_subscription_handler),
        )
        .route(
            "/webhooks/subscriptions/:id/rotate-secret",
            post(subscriptions::rotate_secret_handler),
        )
        // Event types
        .route(
            "/webhooks/event-types",
            get(subscriptions::list_event_types_handler),
        )
        // Delivery history
        .route(
            "/webhooks/subscriptions/:id/deliveries",
            get(deliveries::list_deliveries_handler),
        )
        .route(
            "/webhooks/subscriptions/:id/deliveries/:delivery_id",
            get(deliveries::get_delivery_handler),
        )
        .route(
            "/webhooks/subscriptions/:id/deliveries/:delivery_id/replay",
            post(deliveries::replay_delivery_handler),
        )
        .with_state(state)
}
