//! Webhook event delivery for carepath domain events.
//!
//! Publishes tenant-scoped domain events (journey stage changes, survey
//! completions, churn risk scores, ...) to externally registered HTTP
//! endpoints with at-least-once semantics:
//!
//! - [`EventPublisher`] fans an event out to every active matching
//!   subscription, writing one `pending` delivery per match. No network I/O.
//! - [`RetryScheduler`] periodically claims due deliveries and drives them
//!   through the [`Dispatcher`], which signs the stored payload with
//!   HMAC-SHA256 and classifies the HTTP outcome.
//! - [`SubscriptionService`] and [`DeliveryService`] back the admin API.
//!
//! Persistence is behind the [`SubscriptionStore`] and [`DeliveryStore`]
//! traits, with an in-memory and a PostgreSQL implementation.

pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod retry;
pub mod router;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod validation;

pub use config::WebhookConfig;
pub use error::{ConfigError, WebhookError};
pub use events::{WebhookEvent, WebhookEventType, WebhookPayload};
pub use models::{DeliveryStatus, WebhookDelivery, WebhookSubscription};
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy};
pub use router::{webhooks_router, WebhooksState};
pub use scheduler::{RetryScheduler, SchedulerConfig, SweepStats};
pub use services::delivery_service::DeliveryService;
pub use services::dispatcher::{AttemptOutcome, Dispatcher};
pub use services::event_publisher::{EventPublisher, PublishReceipt};
pub use services::subscription_service::SubscriptionService;
pub use store::{DeliveryStore, MemoryStore, PgStore, StoreError, SubscriptionStore};
