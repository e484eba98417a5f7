//! HTTP handlers for the webhook admin API.

pub mod deliveries;
pub mod subscriptions;
