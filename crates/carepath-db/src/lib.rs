//! # carepath-db
//!
//! PostgreSQL persistence for webhook subscriptions and deliveries.
//!
//! Row models live in [`models`] and expose their queries as associated
//! functions taking a `&PgPool`, so callers never assemble SQL themselves.
//!
//! ```rust,ignore
//! use carepath_db::{DbPool, run_migrations};
//! use carepath_db::models::WebhookSubscriptionRow;
//!
//! let pool = DbPool::connect("postgres://localhost/carepath").await?;
//! run_migrations(&pool).await?;
//!
//! let active = WebhookSubscriptionRow::find_active_by_event_type(
//!     pool.inner(),
//!     tenant_id,
//!     "survey.completed",
//! )
//! .await?;
//! ```

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;

pub use error::DbError;
pub use migrations::run_migrations;
pub use pool::DbPool;
