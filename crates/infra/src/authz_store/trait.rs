use async_trait::async_trait;
use thiserror::Error;

use gatehouse_auth::{
    EndpointRuleRow, PermissionKey, PermissionKeyRow, RoleGrantRow, RoleRow, RuleBindingRow,
};
use gatehouse_core::{DomainError, PermissionKeyId, RoleId, RuleId};

/// Authorization store operation error.
///
/// ## Error Categories
///
/// - **Domain**: user-correctable rejection at the admin boundary
///   (`NotFound`, `Duplicate`, `OrderingInvalid`, `Validation`)
/// - **Timeout**: the backend did not answer in time (retryable once on the hot path)
/// - **Backend**: anything else the backend reported (connection, decoding, lock poisoning)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("store timed out during {0}")]
    Timeout(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Persistence collaborator for rules, permission keys, roles and grants.
///
/// ## Read Semantics
///
/// Every read filters out retired rows. Bindings and grants naming a key that
/// was never created are still returned; snapshot builders drop those against
/// the live catalog.
///
/// ## Write Semantics
///
/// Writes enforce uniqueness among **active** rows atomically:
/// - one active rule per normalized (path, method) → `Duplicate`
/// - one active permission key per key string → `Duplicate`
/// - one active sibling per (parent, sort_order) → `OrderingInvalid`
/// - one active role per name → `Duplicate`
///
/// Retirement is a flag flip, never a delete. Retiring a rule or a permission
/// key retires the bindings (and, for keys, the grants) that depend on it in the
/// same write. Writes do not touch any cache; invalidation is the caller's
/// job (see `AuthzAdmin`).
#[async_trait]
pub trait AuthzStore: Send + Sync {
    async fn active_rules(&self) -> Result<Vec<EndpointRuleRow>, StoreError>;

    async fn active_bindings(&self) -> Result<Vec<RuleBindingRow>, StoreError>;

    async fn active_permission_keys(&self) -> Result<Vec<PermissionKeyRow>, StoreError>;

    async fn active_roles(&self) -> Result<Vec<RoleRow>, StoreError>;

    async fn rule(&self, id: RuleId) -> Result<Option<EndpointRuleRow>, StoreError>;

    async fn permission_key(&self, id: PermissionKeyId) -> Result<Option<PermissionKeyRow>, StoreError>;

    async fn role(&self, id: RoleId) -> Result<Option<RoleRow>, StoreError>;

    async fn role_grants(&self, role_id: RoleId) -> Result<Vec<RoleGrantRow>, StoreError>;

    /// Insert a rule together with its bindings in one atomic write.
    ///
    /// Readers never observe the rule without the bindings. Every binding must
    /// name `row.id`; a repeated key keeps the last `enforced` value.
    async fn insert_rule(&self, row: EndpointRuleRow, bindings: Vec<RuleBindingRow>) -> Result<(), StoreError>;

    async fn update_rule(&self, row: EndpointRuleRow) -> Result<(), StoreError>;

    async fn retire_rule(&self, id: RuleId) -> Result<(), StoreError>;

    /// Insert a binding, or update `enforced` on the active one.
    async fn upsert_binding(&self, row: RuleBindingRow) -> Result<(), StoreError>;

    async fn retire_binding(&self, rule_id: RuleId, key: &PermissionKey) -> Result<(), StoreError>;

    async fn insert_permission_key(&self, row: PermissionKeyRow) -> Result<(), StoreError>;

    /// Update display name / parent / sort order. The key string is immutable.
    async fn update_permission_key(&self, row: PermissionKeyRow) -> Result<(), StoreError>;

    /// Retire a key along with every binding and grant naming it, so a later
    /// key with the same string starts with none.
    async fn retire_permission_key(&self, id: PermissionKeyId) -> Result<(), StoreError>;

    async fn insert_role(&self, row: RoleRow) -> Result<(), StoreError>;

    async fn update_role(&self, row: RoleRow) -> Result<(), StoreError>;

    async fn retire_role(&self, id: RoleId) -> Result<(), StoreError>;

    /// Idempotent: granting an already-granted key is a no-op.
    async fn grant(&self, row: RoleGrantRow) -> Result<(), StoreError>;

    async fn revoke(&self, role_id: RoleId, key: &PermissionKey) -> Result<(), StoreError>;
}
