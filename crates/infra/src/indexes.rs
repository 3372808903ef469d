//! Cached indexes over the authorization store.
//!
//! Three caches back the hot path:
//! - `registry`: the whole endpoint registry (single key)
//! - `catalog`: the permission-key catalog (single key)
//! - `grants`: flattened grants per role
//!
//! Every store read made while building a snapshot runs under a timeout and is
//! retried once after a short backoff when it times out.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use gatehouse_auth::{
    EffectiveGrants, EndpointRegistry, EndpointRule, PermissionCatalog, PermissionKey, RoleGrants,
};
use gatehouse_core::RoleId;

use crate::authz_store::{AuthzStore, StoreError};
use crate::cache::{CacheStats, Snapshot, SnapshotCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Upper bound for a single store read.
    pub timeout: Duration,
    /// Pause before the one retry after a timeout.
    pub retry_backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(250),
            retry_backoff: Duration::from_millis(25),
        }
    }
}

#[derive(Debug)]
pub struct AuthzCaches {
    pub registry: SnapshotCache<(), EndpointRegistry>,
    pub catalog: SnapshotCache<(), PermissionCatalog>,
    pub grants: SnapshotCache<RoleId, RoleGrants>,
}

impl Default for AuthzCaches {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthzCaches {
    pub fn new() -> Self {
        Self {
            registry: SnapshotCache::new("endpoint_registry"),
            catalog: SnapshotCache::new("permission_catalog"),
            grants: SnapshotCache::new("role_grants"),
        }
    }

    /// A rule or one of its bindings changed.
    pub fn rules_changed(&self) {
        self.registry.invalidate(&());
    }

    /// Display-only catalog data changed (name, parent, ordering).
    pub fn catalog_changed(&self) {
        self.catalog.invalidate(&());
    }

    /// The set of live permission keys changed. Registry bindings and role
    /// grants are filtered against it, so everything is rebuilt.
    pub fn keys_changed(&self) {
        self.catalog.invalidate(&());
        self.registry.invalidate(&());
        self.grants.invalidate_all();
    }

    /// A role's status, existence or grants changed.
    pub fn role_changed(&self, role_id: RoleId) {
        self.grants.invalidate(&role_id);
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        vec![self.registry.stats(), self.catalog.stats(), self.grants.stats()]
    }
}

/// Read side of the authorization data: store plus snapshot caches.
pub struct AuthzIndexes<S: AuthzStore + ?Sized> {
    store: Arc<S>,
    caches: Arc<AuthzCaches>,
    fetch: FetchPolicy,
}

impl<S: AuthzStore + ?Sized> AuthzIndexes<S> {
    pub fn new(store: Arc<S>, caches: Arc<AuthzCaches>, fetch: FetchPolicy) -> Self {
        Self {
            store,
            caches,
            fetch,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn caches(&self) -> &Arc<AuthzCaches> {
        &self.caches
    }

    pub async fn catalog(&self) -> Result<Arc<Snapshot<PermissionCatalog>>, StoreError> {
        self.caches
            .catalog
            .get_or_build(&(), || async {
                let rows = self
                    .fetch("active_permission_keys", || self.store.active_permission_keys())
                    .await?;
                let catalog = PermissionCatalog::build(rows);
                debug!(keys = catalog.len(), "permission catalog rebuilt");
                Ok::<_, StoreError>(catalog)
            })
            .await
    }

    pub async fn registry(&self) -> Result<Arc<Snapshot<EndpointRegistry>>, StoreError> {
        self.caches
            .registry
            .get_or_build(&(), || async {
                let live_keys = self.live_keys().await?;
                let rules = self.fetch("active_rules", || self.store.active_rules()).await?;
                let bindings = self
                    .fetch("active_bindings", || self.store.active_bindings())
                    .await?;
                let registry = EndpointRegistry::build(rules, bindings, &live_keys);
                debug!(rules = registry.len(), "endpoint registry rebuilt");
                Ok::<_, StoreError>(registry)
            })
            .await
    }

    /// Grants of one role. Entries for unknown or retired roles are not kept,
    /// so arbitrary role ids in tokens cannot grow the cache.
    pub async fn role_grants(&self, role_id: RoleId) -> Result<Arc<Snapshot<RoleGrants>>, StoreError> {
        let snapshot = self
            .caches
            .grants
            .get_or_build(&role_id, || async {
                let live_keys = self.live_keys().await?;
                let role = self.fetch("role", || self.store.role(role_id)).await?;
                let grants = match role {
                    Some(_) => self.fetch("role_grants", || self.store.role_grants(role_id)).await?,
                    None => Vec::new(),
                };
                Ok::<_, StoreError>(RoleGrants::build(role_id, role, grants, &live_keys))
            })
            .await?;
        if snapshot.is_absent() {
            self.caches.grants.discard(&role_id, &snapshot);
        }
        Ok(snapshot)
    }

    /// Union of grants over the given roles. Unknown, inactive and retired roles contribute nothing.
    pub async fn effective_grants(&self, role_ids: &[RoleId]) -> Result<EffectiveGrants, StoreError> {
        let mut seen = HashSet::with_capacity(role_ids.len());
        let mut snapshots = Vec::with_capacity(role_ids.len());
        for role_id in role_ids {
            if seen.insert(*role_id) {
                snapshots.push(self.role_grants(*role_id).await?);
            }
        }
        Ok(EffectiveGrants::union(snapshots.iter().map(|s| s.value())))
    }

    pub async fn resolve(&self, path: &str, method: &str) -> Result<Option<Arc<EndpointRule>>, StoreError> {
        Ok(self.registry().await?.resolve(path, method))
    }

    async fn live_keys(&self) -> Result<HashSet<PermissionKey>, StoreError> {
        Ok(self.catalog().await?.active_keys())
    }

    async fn fetch<T, F, Fut>(&self, operation: &'static str, read: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match self.attempt(operation, &read).await {
            Err(err) if err.is_timeout() => {
                warn!(operation, error = %err, "store read timed out; retrying once");
                tokio::time::sleep(self.fetch.retry_backoff).await;
                self.attempt(operation, &read).await
            }
            other => other,
        }
    }

    async fn attempt<T, F, Fut>(&self, operation: &'static str, read: &F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.fetch.timeout, read()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(operation.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz_store::InMemoryAuthzStore;
    use gatehouse_auth::{PermissionKeyRow, RoleGrantRow, RoleRow, RoleStatus};
    use gatehouse_core::PermissionKeyId;

    fn indexes(store: Arc<InMemoryAuthzStore>) -> AuthzIndexes<InMemoryAuthzStore> {
        AuthzIndexes::new(
            store,
            Arc::new(AuthzCaches::new()),
            FetchPolicy {
                timeout: Duration::from_millis(50),
                retry_backoff: Duration::from_millis(5),
            },
        )
    }

    async fn key(store: &InMemoryAuthzStore, name: &str, sort_order: i32) {
        store
            .insert_permission_key(PermissionKeyRow {
                id: PermissionKeyId::new(),
                key: PermissionKey::new(name.to_string()),
                display_name: name.to_string(),
                parent_id: None,
                sort_order,
                retired: false,
            })
            .await
            .unwrap();
    }

    async fn role_with(store: &InMemoryAuthzStore, status: RoleStatus, keys: &[&str]) -> RoleId {
        let id = RoleId::new();
        store
            .insert_role(RoleRow {
                id,
                name: format!("role-{id}"),
                status,
                retired: false,
            })
            .await
            .unwrap();
        for k in keys {
            store
                .grant(RoleGrantRow {
                    role_id: id,
                    permission_key: PermissionKey::new(k.to_string()),
                    retired: false,
                })
                .await
                .unwrap();
        }
        id
    }

    #[tokio::test]
    async fn effective_grants_skip_inactive_and_unknown_roles() {
        let store = Arc::new(InMemoryAuthzStore::new());
        key(&store, "News.Read", 1).await;
        key(&store, "News.Write", 2).await;
        let reader = role_with(&store, RoleStatus::Active, &["News.Read"]).await;
        let writer = role_with(&store, RoleStatus::Inactive, &["News.Write"]).await;

        let idx = indexes(store);
        let effective = idx
            .effective_grants(&[reader, writer, RoleId::new(), reader])
            .await
            .unwrap();

        assert_eq!(effective.roles, vec![reader]);
        assert!(effective.contains(&PermissionKey::new("News.Read")));
        assert!(!effective.contains(&PermissionKey::new("News.Write")));
    }

    #[tokio::test]
    async fn unknown_roles_leave_no_cache_entry() {
        let store = Arc::new(InMemoryAuthzStore::new());
        key(&store, "News.Read", 1).await;
        let reader = role_with(&store, RoleStatus::Active, &["News.Read"]).await;
        let idx = indexes(store);

        let strangers: Vec<RoleId> = (0..50).map(|_| RoleId::new()).collect();
        let mut roles = strangers.clone();
        roles.push(reader);
        idx.effective_grants(&roles).await.unwrap();

        assert_eq!(idx.caches().grants.stats().entries, 1);
        assert!(idx.caches().grants.peek(&reader).is_some());
        assert!(strangers.iter().all(|id| idx.caches().grants.peek(id).is_none()));
    }

    #[tokio::test]
    async fn grants_naming_retired_keys_are_dropped() {
        let store = Arc::new(InMemoryAuthzStore::new());
        key(&store, "News.Read", 1).await;
        let role = role_with(&store, RoleStatus::Active, &["News.Read", "Ghost.Key"]).await;

        let idx = indexes(store);
        let grants = idx.role_grants(role).await.unwrap();
        assert_eq!(grants.keys.len(), 1);
    }

    #[tokio::test]
    async fn single_timeout_is_retried() {
        let store = Arc::new(InMemoryAuthzStore::new());
        key(&store, "News.Read", 1).await;
        store.stall_next_reads(1, Duration::from_millis(200));

        let idx = indexes(store.clone());
        let catalog = idx.catalog().await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test]
    async fn second_timeout_surfaces_as_timeout() {
        let store = Arc::new(InMemoryAuthzStore::new());
        store.stall_next_reads(2, Duration::from_millis(200));

        let idx = indexes(store.clone());
        let err = idx.catalog().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(store.read_count(), 2);
        assert!(idx.caches().catalog.peek(&()).is_none());
    }

    #[tokio::test]
    async fn keys_changed_rebuilds_dependent_snapshots() {
        let store = Arc::new(InMemoryAuthzStore::new());
        key(&store, "News.Read", 1).await;
        let role = role_with(&store, RoleStatus::Active, &["News.Read"]).await;
        let idx = indexes(store);

        let before = idx.role_grants(role).await.unwrap();
        idx.caches().keys_changed();
        let after = idx.role_grants(role).await.unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.version > before.version);
    }
}
