//! Administrative mutation path.
//!
//! Every operation validates its input, writes through the store and then
//! invalidates exactly the snapshots the write can affect. Readers holding an
//! older snapshot finish with it; the next read rebuilds.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use gatehouse_auth::rule::{validate_method, validate_path};
use gatehouse_auth::{
    EndpointRuleRow, PermissionCatalog, PermissionKey, PermissionKeyRow, RoleGrantRow, RoleRow,
    RoleStatus, RuleBindingRow,
};
use gatehouse_core::{DomainError, PermissionKeyId, RoleId, RuleId};

use crate::authz_store::{AuthzStore, StoreError};
use crate::indexes::AuthzCaches;

const MAX_ROLE_NAME_LEN: usize = 128;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBinding {
    pub permission_key: String,
    #[serde(default = "default_true")]
    pub enforced: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRule {
    pub path: String,
    pub method: String,
    #[serde(default = "default_true")]
    pub require_authentication: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub bindings: Vec<NewBinding>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleUpdate {
    pub path: Option<String>,
    pub method: Option<String>,
    pub require_authentication: Option<bool>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPermissionKey {
    pub key: String,
    pub display_name: Option<String>,
    pub parent_id: Option<PermissionKeyId>,
    /// Appended after the last sibling when absent.
    pub sort_order: Option<i32>,
}

/// Target position of a permission key. `parent_id: None` places it at the root.
#[derive(Debug, Clone, Deserialize)]
pub struct Placement {
    pub parent_id: Option<PermissionKeyId>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionKeyUpdate {
    pub display_name: Option<String>,
    pub placement: Option<Placement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub id: Option<RoleId>,
    pub name: String,
    pub status: Option<RoleStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub status: Option<RoleStatus>,
}

pub struct AuthzAdmin<S: AuthzStore + ?Sized> {
    store: Arc<S>,
    caches: Arc<AuthzCaches>,
}

impl<S: AuthzStore + ?Sized> Clone for AuthzAdmin<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            caches: Arc::clone(&self.caches),
        }
    }
}

impl<S: AuthzStore + ?Sized> AuthzAdmin<S> {
    pub fn new(store: Arc<S>, caches: Arc<AuthzCaches>) -> Self {
        Self { store, caches }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Rules and bindings
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_rule(&self, input: NewRule) -> Result<EndpointRuleRow, StoreError> {
        let row = EndpointRuleRow {
            id: RuleId::new(),
            path: validate_path(&input.path)?,
            method: validate_method(&input.method)?,
            require_authentication: input.require_authentication,
            description: input.description,
            retired: false,
        };

        let catalog = self.fresh_catalog().await?;
        let mut bindings = Vec::with_capacity(input.bindings.len());
        for binding in &input.bindings {
            bindings.push(RuleBindingRow {
                rule_id: row.id,
                permission_key: live_key(&catalog, &binding.permission_key)?,
                enforced: binding.enforced,
                retired: false,
            });
        }

        self.store.insert_rule(row.clone(), bindings).await?;
        self.caches.rules_changed();

        info!(rule_id = %row.id, route = %row.route_key(), "endpoint rule created");
        Ok(row)
    }

    pub async fn update_rule(&self, id: RuleId, update: RuleUpdate) -> Result<EndpointRuleRow, StoreError> {
        let mut row = self
            .store
            .rule(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("rule {id}")))?;

        if let Some(path) = update.path {
            row.path = validate_path(&path)?;
        }
        if let Some(method) = update.method {
            row.method = validate_method(&method)?;
        }
        if let Some(require) = update.require_authentication {
            row.require_authentication = require;
        }
        if update.description.is_some() {
            row.description = update.description;
        }

        self.store.update_rule(row.clone()).await?;
        self.caches.rules_changed();

        info!(rule_id = %id, route = %row.route_key(), "endpoint rule updated");
        Ok(row)
    }

    pub async fn retire_rule(&self, id: RuleId) -> Result<(), StoreError> {
        self.store.retire_rule(id).await?;
        self.caches.rules_changed();
        info!(rule_id = %id, "endpoint rule retired");
        Ok(())
    }

    /// Bind a live permission key to a rule, or change whether it is enforced.
    pub async fn bind_permission(&self, rule_id: RuleId, key: &str, enforced: bool) -> Result<(), StoreError> {
        let catalog = self.fresh_catalog().await?;
        let key = live_key(&catalog, key)?;

        self.store
            .upsert_binding(RuleBindingRow {
                rule_id,
                permission_key: key.clone(),
                enforced,
                retired: false,
            })
            .await?;
        self.caches.rules_changed();

        info!(rule_id = %rule_id, key = %key, enforced, "permission bound to rule");
        Ok(())
    }

    pub async fn unbind_permission(&self, rule_id: RuleId, key: &str) -> Result<(), StoreError> {
        let key = PermissionKey::parse(key)?;
        self.store.retire_binding(rule_id, &key).await?;
        self.caches.rules_changed();
        info!(rule_id = %rule_id, key = %key, "permission unbound from rule");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Permission keys
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_permission_key(&self, input: NewPermissionKey) -> Result<PermissionKeyRow, StoreError> {
        let key = PermissionKey::parse(&input.key)?;
        let catalog = self.fresh_catalog().await?;
        catalog.check_unique_key(&key, None)?;

        let sort_order = match input.sort_order {
            Some(order) => order,
            None => next_sort_order(&catalog, input.parent_id, None),
        };
        let display_name = match input.display_name {
            Some(name) => non_empty(&name, "display name")?,
            None => key.to_string(),
        };

        let row = PermissionKeyRow {
            id: PermissionKeyId::new(),
            key,
            display_name,
            parent_id: input.parent_id,
            sort_order,
            retired: false,
        };
        self.store.insert_permission_key(row.clone()).await?;
        self.caches.keys_changed();

        info!(permission_key_id = %row.id, key = %row.key, "permission key created");
        Ok(row)
    }

    /// Rename, move or reorder a permission key. The key string never changes.
    pub async fn update_permission_key(
        &self,
        id: PermissionKeyId,
        update: PermissionKeyUpdate,
    ) -> Result<PermissionKeyRow, StoreError> {
        let catalog = self.fresh_catalog().await?;
        let mut row = catalog
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("permission key {id}")))?;

        if let Some(name) = update.display_name {
            row.display_name = non_empty(&name, "display name")?;
        }
        if let Some(placement) = update.placement {
            row.sort_order = match placement.sort_order {
                Some(order) => order,
                None if placement.parent_id == row.parent_id => row.sort_order,
                None => next_sort_order(&catalog, placement.parent_id, Some(id)),
            };
            row.parent_id = placement.parent_id;
        }

        self.store.update_permission_key(row.clone()).await?;
        self.caches.catalog_changed();

        info!(permission_key_id = %id, key = %row.key, "permission key updated");
        Ok(row)
    }

    /// Retire a key together with the bindings and grants naming it.
    pub async fn retire_permission_key(&self, id: PermissionKeyId) -> Result<(), StoreError> {
        self.store.retire_permission_key(id).await?;
        self.caches.keys_changed();
        info!(permission_key_id = %id, "permission key retired");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Roles and grants
    // ─────────────────────────────────────────────────────────────────────

    pub async fn list_roles(&self) -> Result<Vec<RoleRow>, StoreError> {
        let mut roles = self.store.active_roles().await?;
        roles.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(roles)
    }

    pub async fn create_role(&self, input: NewRole) -> Result<RoleRow, StoreError> {
        let row = RoleRow {
            id: input.id.unwrap_or_else(RoleId::new),
            name: role_name(&input.name)?,
            status: input.status.unwrap_or_default(),
            retired: false,
        };
        self.store.insert_role(row.clone()).await?;
        // Drop any entry a concurrent read built before the role existed.
        self.caches.role_changed(row.id);

        info!(role_id = %row.id, name = %row.name, "role created");
        Ok(row)
    }

    /// Rename, activate or deactivate a role.
    pub async fn update_role(&self, id: RoleId, update: RoleUpdate) -> Result<RoleRow, StoreError> {
        let mut row = self
            .store
            .role(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("role {id}")))?;

        if let Some(name) = update.name {
            row.name = role_name(&name)?;
        }
        if let Some(status) = update.status {
            row.status = status;
        }

        self.store.update_role(row.clone()).await?;
        self.caches.role_changed(id);

        info!(role_id = %id, status = %row.status, "role updated");
        Ok(row)
    }

    pub async fn retire_role(&self, id: RoleId) -> Result<(), StoreError> {
        self.store.retire_role(id).await?;
        self.caches.role_changed(id);
        info!(role_id = %id, "role retired");
        Ok(())
    }

    pub async fn grant(&self, role_id: RoleId, key: &str) -> Result<(), StoreError> {
        let catalog = self.fresh_catalog().await?;
        let key = live_key(&catalog, key)?;

        self.store
            .grant(RoleGrantRow {
                role_id,
                permission_key: key.clone(),
                retired: false,
            })
            .await?;
        self.caches.role_changed(role_id);

        info!(role_id = %role_id, key = %key, "permission granted to role");
        Ok(())
    }

    pub async fn revoke(&self, role_id: RoleId, key: &str) -> Result<(), StoreError> {
        let key = PermissionKey::parse(key)?;
        self.store.revoke(role_id, &key).await?;
        self.caches.role_changed(role_id);
        info!(role_id = %role_id, key = %key, "permission revoked from role");
        Ok(())
    }

    async fn fresh_catalog(&self) -> Result<PermissionCatalog, StoreError> {
        Ok(PermissionCatalog::build(self.store.active_permission_keys().await?))
    }
}

fn live_key(catalog: &PermissionCatalog, raw: &str) -> Result<PermissionKey, StoreError> {
    let key = PermissionKey::parse(raw)?;
    if !catalog.contains_key(&key) {
        return Err(DomainError::not_found(format!("permission key '{key}'")).into());
    }
    Ok(key)
}

fn next_sort_order(
    catalog: &PermissionCatalog,
    parent_id: Option<PermissionKeyId>,
    exclude: Option<PermissionKeyId>,
) -> i32 {
    let siblings = match parent_id {
        Some(parent) => catalog.children(&parent),
        None => catalog.roots(),
    };
    siblings
        .into_iter()
        .filter(|row| Some(row.id) != exclude)
        .map(|row| row.sort_order)
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

fn non_empty(raw: &str, what: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{what} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn role_name(raw: &str) -> Result<String, DomainError> {
    let name = non_empty(raw, "role name")?;
    if name.chars().count() > MAX_ROLE_NAME_LEN {
        return Err(DomainError::validation(format!(
            "role name exceeds {MAX_ROLE_NAME_LEN} characters"
        )));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz_store::InMemoryAuthzStore;

    fn admin() -> (Arc<InMemoryAuthzStore>, Arc<AuthzCaches>, AuthzAdmin<InMemoryAuthzStore>) {
        let store = Arc::new(InMemoryAuthzStore::new());
        let caches = Arc::new(AuthzCaches::new());
        let admin = AuthzAdmin::new(store.clone(), caches.clone());
        (store, caches, admin)
    }

    fn new_key(key: &str, parent_id: Option<PermissionKeyId>) -> NewPermissionKey {
        NewPermissionKey {
            key: key.to_string(),
            display_name: None,
            parent_id,
            sort_order: None,
        }
    }

    #[tokio::test]
    async fn keys_are_appended_after_last_sibling() {
        let (_, _, admin) = admin();
        let news = admin.create_permission_key(new_key("News", None)).await.unwrap();
        let read = admin.create_permission_key(new_key("News.Read", Some(news.id))).await.unwrap();
        let write = admin.create_permission_key(new_key("News.Write", Some(news.id))).await.unwrap();

        assert_eq!(news.sort_order, 1);
        assert_eq!(read.sort_order, 1);
        assert_eq!(write.sort_order, 2);
    }

    #[tokio::test]
    async fn moving_under_own_descendant_is_rejected() {
        let (_, _, admin) = admin();
        let news = admin.create_permission_key(new_key("News", None)).await.unwrap();
        let read = admin.create_permission_key(new_key("News.Read", Some(news.id))).await.unwrap();

        let err = admin
            .update_permission_key(
                news.id,
                PermissionKeyUpdate {
                    display_name: None,
                    placement: Some(Placement {
                        parent_id: Some(read.id),
                        sort_order: None,
                    }),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn explicit_sibling_collision_is_ordering_invalid() {
        let (_, _, admin) = admin();
        let mut input = new_key("News", None);
        input.sort_order = Some(5);
        admin.create_permission_key(input).await.unwrap();

        let mut clash = new_key("Users", None);
        clash.sort_order = Some(5);
        let err = admin.create_permission_key(clash).await.unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::OrderingInvalid(_))));
    }

    #[tokio::test]
    async fn binding_an_unknown_key_is_not_found() {
        let (_, _, admin) = admin();
        let err = admin
            .create_rule(NewRule {
                path: "/news".to_string(),
                method: "get".to_string(),
                require_authentication: true,
                description: None,
                bindings: vec![NewBinding {
                    permission_key: "News.Read".to_string(),
                    enforced: true,
                }],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn invalid_rule_input_is_a_validation_error() {
        let (store, _, admin) = admin();
        let err = admin
            .create_rule(NewRule {
                path: "news/*".to_string(),
                method: "GET".to_string(),
                require_authentication: true,
                description: None,
                bindings: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Validation(_))));
        assert!(store.active_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn grant_invalidates_only_that_role() {
        use gatehouse_auth::RoleGrants;

        let (_, caches, admin) = admin();
        admin.create_permission_key(new_key("News.Read", None)).await.unwrap();
        let role = admin
            .create_role(NewRole {
                id: None,
                name: "Reader".to_string(),
                status: None,
            })
            .await
            .unwrap();
        assert_eq!(role.status, RoleStatus::Active);

        let other = RoleId::new();
        for id in [role.id, other] {
            caches
                .grants
                .get_or_build(&id, || async move { Ok::<_, ()>(RoleGrants::absent(id)) })
                .await
                .unwrap();
        }

        admin.grant(role.id, "News.Read").await.unwrap();
        assert!(caches.grants.peek(&role.id).is_none());
        assert!(caches.grants.peek(&other).is_some());
    }

    #[tokio::test]
    async fn blank_role_name_is_rejected() {
        let (_, _, admin) = admin();
        let err = admin
            .create_role(NewRole {
                id: None,
                name: "   ".to_string(),
                status: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Validation(_))));
    }
}
