//! carepath Core Library
//!
//! Shared types and traits for carepath.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (TenantId, SubscriptionId, DeliveryId, EventId)
//! - [`traits`] - Multi-tenant traits (TenantAware)
//!
//! # Example
//!
//! ```
//! use carepath_core::{TenantId, SubscriptionId, TenantAware};
//!
//! struct Subscription {
//!     id: SubscriptionId,
//!     tenant_id: TenantId,
//! }
//!
//! impl TenantAware for Subscription {
//!     fn tenant_id(&self) -> TenantId {
//!         self.tenant_id
//!     }
//! }
//!
//! let tenant = TenantId::new();
//! let sub = Subscription { id: SubscriptionId::new(), tenant_id: tenant };
//! assert!(sub.belongs_to(tenant));
//! ```

pub mod ids;
pub mod traits;

pub use ids::{DeliveryId, EventId, ParseIdError, SubscriptionId, TenantId};
pub use traits::TenantAware;
