//! Domain records and API request/response types.

pub mod api;
pub mod delivery;
pub mod subscription;

pub use api::*;
pub use delivery::{AttemptRecord, DeliveryStateError, DeliveryStatus, WebhookDelivery};
pub use subscription::WebhookSubscription;
