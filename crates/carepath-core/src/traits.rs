//! Multi-Tenant Traits
//!
//! # Example
//!
//! ```
//! use carepath_core::{TenantId, TenantAware};
//!
//! struct Delivery {
//!     tenant_id: TenantId,
//! }
//!
//! impl TenantAware for Delivery {
//!     fn tenant_id(&self) -> TenantId {
//!         self.tenant_id
//!     }
//! }
//!
//! let tenant = TenantId::new();
//! let delivery = Delivery { tenant_id: tenant };
//! assert!(delivery.belongs_to(tenant));
//! assert!(!delivery.belongs_to(TenantId::new()));
//! ```

use crate::ids::TenantId;

/// Trait for entities that belong to a specific tenant.
///
/// Stores use it to enforce tenant isolation on every lookup: a record whose
/// tenant does not match the caller's is treated as absent.
pub trait TenantAware {
    /// Returns the tenant ID associated with this entity.
    fn tenant_id(&self) -> TenantId;

    /// Returns true when the entity is owned by `tenant_id`.
    fn belongs_to(&self, tenant_id: TenantId) -> bool {
        self.tenant_id() == tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestEntity {
        tenant_id: TenantId,
    }

    impl TenantAware for TestEntity {
        fn tenant_id(&self) -> TenantId {
            self.tenant_id
        }
    }

    #[test]
    fn test_tenant_aware_returns_correct_id() {
        let tenant_id = TenantId::new();
        let entity = TestEntity { tenant_id };
        assert_eq!(entity.tenant_id(), tenant_id);
    }

    #[test]
    fn test_trait_object_usage() {
        let tenant_id = TenantId::new();
        let entity = TestEntity { tenant_id };
        let dyn_entity: &dyn TenantAware = &entity;
        assert!(dyn_entity.belongs_to(tenant_id));
        assert!(!dyn_entity.belongs_to(TenantId::new()));
    }
}
