//! Row models for webhook tables.

pub mod webhook_delivery;
pub mod webhook_subscription;

pub use webhook_delivery::WebhookDeliveryRow;
pub use webhook_subscription::WebhookSubscriptionRow;
