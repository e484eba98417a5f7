//! Webhook services.

pub mod delivery_service;
pub mod dispatcher;
pub mod event_publisher;
pub mod subscription_service;
