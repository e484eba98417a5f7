//! Strongly Typed Identifiers
//!
//! Newtype wrappers over [`Uuid`] so a delivery id can never be passed where
//! a subscription id is expected.
//!
//! # Example
//!
//! ```
//! use carepath_core::{DeliveryId, SubscriptionId};
//!
//! let subscription = SubscriptionId::new();
//! let delivery = DeliveryId::new();
//!
//! fn requires_subscription(id: SubscriptionId) -> String {
//!     id.to_string()
//! }
//!
//! let result = requires_subscription(subscription);
//! // requires_subscription(delivery); // This would not compile!
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying UUID parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to define a strongly-typed ID type
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Consumes the ID and returns the underlying UUID.
            #[must_use]
            pub fn into_uuid(self) -> Uuid {
                self.0
            }

            /// Returns true for the all-zero UUID, which is never a valid identifier.
            #[must_use]
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }
    };
}

define_id!(
    /// Strongly typed identifier for tenants.
    ///
    /// Every subscription and delivery is owned by exactly one tenant.
    ///
    /// # Example
    ///
    /// ```
    /// use carepath_core::TenantId;
    /// use uuid::Uuid;
    ///
    /// let uuid = Uuid::new_v4();
    /// let tenant_id = TenantId::from_uuid(uuid);
    /// assert_eq!(tenant_id.as_uuid(), &uuid);
    ///
    /// let parsed: TenantId = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
    /// assert!(!parsed.is_nil());
    /// ```
    TenantId
);

define_id!(
    /// Strongly typed identifier for webhook subscriptions.
    SubscriptionId
);

define_id!(
    /// Strongly typed identifier for webhook deliveries.
    ///
    /// Sent to receivers in the `X-Webhook-Delivery-Id` header so they can
    /// de-duplicate retried POSTs.
    DeliveryId
);

define_id!(
    /// Strongly typed identifier for published domain events.
    EventId
);
