//! Infrastructure layer: persistence, snapshot caching, the async gate and
//! the administrative mutation path.

pub mod admin;
pub mod authz_store;
pub mod cache;
pub mod config;
pub mod engine;
pub mod indexes;
pub mod seed;

pub use admin::{
    AuthzAdmin, NewBinding, NewPermissionKey, NewRole, NewRule, PermissionKeyUpdate, Placement,
    RoleUpdate, RuleUpdate,
};
pub use authz_store::{AuthzStore, InMemoryAuthzStore, PostgresAuthzStore, StoreError};
pub use cache::{CacheStats, Snapshot, SnapshotCache};
pub use config::{ConfigError, GatehouseConfig};
pub use engine::{AuthorizationEngine, Decision};
pub use indexes::{AuthzCaches, AuthzIndexes, FetchPolicy};
pub use seed::{SeedData, administrator_role_id, bootstrap};
