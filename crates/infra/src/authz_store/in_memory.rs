use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use gatehouse_auth::{
    EndpointRuleRow, PermissionCatalog, PermissionKey, PermissionKeyRow, RoleGrantRow, RoleRow,
    RuleBindingRow,
};
use gatehouse_core::{DomainError, PermissionKeyId, RoleId, RuleId, active};

use super::r#trait::{AuthzStore, StoreError};
use crate::seed::SeedData;

#[derive(Debug, Default)]
struct Tables {
    rules: HashMap<RuleId, EndpointRuleRow>,
    bindings: Vec<RuleBindingRow>,
    keys: HashMap<PermissionKeyId, PermissionKeyRow>,
    roles: HashMap<RoleId, RoleRow>,
    grants: Vec<RoleGrantRow>,
}

impl Tables {
    fn catalog(&self) -> PermissionCatalog {
        PermissionCatalog::build(self.keys.values().cloned())
    }

    fn active_rule(&self, id: RuleId) -> Result<&EndpointRuleRow, StoreError> {
        self.rules
            .get(&id)
            .filter(|r| !r.retired)
            .ok_or_else(|| DomainError::not_found(format!("rule {id}")).into())
    }

    fn check_route_free(&self, row: &EndpointRuleRow) -> Result<(), StoreError> {
        let route = row.route_key();
        let taken = self
            .rules
            .values()
            .any(|r| !r.retired && r.id != row.id && r.route_key() == route);
        if taken {
            return Err(DomainError::duplicate(format!("an active rule already exists for {route}")).into());
        }
        Ok(())
    }

    fn put_binding(&mut self, row: RuleBindingRow) {
        let existing = self.bindings.iter_mut().find(|b| {
            !b.retired && b.rule_id == row.rule_id && b.permission_key == row.permission_key
        });
        match existing {
            Some(binding) => binding.enforced = row.enforced,
            None => self.bindings.push(RuleBindingRow { retired: false, ..row }),
        }
    }

    fn check_role_name_free(&self, row: &RoleRow) -> Result<(), StoreError> {
        let taken = self
            .roles
            .values()
            .any(|r| !r.retired && r.id != row.id && r.name.eq_ignore_ascii_case(&row.name));
        if taken {
            return Err(DomainError::duplicate(format!("role '{}' already exists", row.name)).into());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Stall {
    remaining: AtomicUsize,
    delay_ms: AtomicU64,
}

/// In-memory authorization store.
///
/// Intended for tests/dev and for running the service without a database.
/// Every write takes the table lock once, so uniqueness checks and the write
/// itself are atomic with respect to other writers.
#[derive(Debug, Default)]
pub struct InMemoryAuthzStore {
    tables: RwLock<Tables>,
    reads: AtomicUsize,
    stall: Stall,
}

impl InMemoryAuthzStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with `seed`, bypassing write validation.
    pub fn from_seed(seed: SeedData) -> Self {
        let tables = Tables {
            rules: seed.rules.into_iter().map(|r| (r.id, r)).collect(),
            bindings: seed.bindings,
            keys: seed.permission_keys.into_iter().map(|k| (k.id, k)).collect(),
            roles: seed.roles.into_iter().map(|r| (r.id, r)).collect(),
            grants: seed.grants,
        };
        Self {
            tables: RwLock::new(tables),
            ..Self::default()
        }
    }

    /// Store preloaded with the administrative defaults.
    pub fn seeded() -> Self {
        Self::from_seed(SeedData::admin_defaults())
    }

    /// Number of read operations served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Delay the next `count` reads by `delay` (simulates a slow backend).
    pub fn stall_next_reads(&self, count: usize, delay: Duration) {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.stall.delay_ms.store(delay_ms, Ordering::SeqCst);
        self.stall.remaining.store(count, Ordering::SeqCst);
    }

    async fn begin_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let stalled = self
            .stall
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stalled {
            let delay = self.stall.delay_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))?;
        Ok(f(&tables))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))?;
        f(&mut tables)
    }
}

#[async_trait]
impl AuthzStore for InMemoryAuthzStore {
    async fn active_rules(&self) -> Result<Vec<EndpointRuleRow>, StoreError> {
        self.begin_read().await;
        self.read(|t| active(t.rules.values().cloned()).collect())
    }

    async fn active_bindings(&self) -> Result<Vec<RuleBindingRow>, StoreError> {
        self.begin_read().await;
        self.read(|t| active(t.bindings.iter().cloned()).collect())
    }

    async fn active_permission_keys(&self) -> Result<Vec<PermissionKeyRow>, StoreError> {
        self.begin_read().await;
        self.read(|t| active(t.keys.values().cloned()).collect())
    }

    async fn active_roles(&self) -> Result<Vec<RoleRow>, StoreError> {
        self.begin_read().await;
        self.read(|t| active(t.roles.values().cloned()).collect())
    }

    async fn rule(&self, id: RuleId) -> Result<Option<EndpointRuleRow>, StoreError> {
        self.begin_read().await;
        self.read(|t| t.rules.get(&id).filter(|r| !r.retired).cloned())
    }

    async fn permission_key(&self, id: PermissionKeyId) -> Result<Option<PermissionKeyRow>, StoreError> {
        self.begin_read().await;
        self.read(|t| t.keys.get(&id).filter(|r| !r.retired).cloned())
    }

    async fn role(&self, id: RoleId) -> Result<Option<RoleRow>, StoreError> {
        self.begin_read().await;
        self.read(|t| t.roles.get(&id).filter(|r| !r.retired).cloned())
    }

    async fn role_grants(&self, role_id: RoleId) -> Result<Vec<RoleGrantRow>, StoreError> {
        self.begin_read().await;
        self.read(|t| {
            active(t.grants.iter().cloned())
                .filter(|g| g.role_id == role_id)
                .collect()
        })
    }

    async fn insert_rule(&self, row: EndpointRuleRow, bindings: Vec<RuleBindingRow>) -> Result<(), StoreError> {
        self.write(|t| {
            if t.rules.contains_key(&row.id) {
                return Err(DomainError::duplicate(format!("rule {} already exists", row.id)).into());
            }
            t.check_route_free(&row)?;
            if let Some(stray) = bindings.iter().find(|b| b.rule_id != row.id) {
                return Err(DomainError::validation(format!(
                    "binding of '{}' names rule {}, not {}",
                    stray.permission_key, stray.rule_id, row.id
                ))
                .into());
            }
            t.rules.insert(row.id, EndpointRuleRow { retired: false, ..row });
            for binding in bindings {
                t.put_binding(binding);
            }
            Ok(())
        })
    }

    async fn update_rule(&self, row: EndpointRuleRow) -> Result<(), StoreError> {
        self.write(|t| {
            t.active_rule(row.id)?;
            t.check_route_free(&row)?;
            t.rules.insert(row.id, EndpointRuleRow { retired: false, ..row });
            Ok(())
        })
    }

    async fn retire_rule(&self, id: RuleId) -> Result<(), StoreError> {
        self.write(|t| {
            t.active_rule(id)?;
            if let Some(rule) = t.rules.get_mut(&id) {
                rule.retired = true;
            }
            for binding in t.bindings.iter_mut().filter(|b| b.rule_id == id) {
                binding.retired = true;
            }
            Ok(())
        })
    }

    async fn upsert_binding(&self, row: RuleBindingRow) -> Result<(), StoreError> {
        self.write(|t| {
            t.active_rule(row.rule_id)?;
            t.put_binding(row);
            Ok(())
        })
    }

    async fn retire_binding(&self, rule_id: RuleId, key: &PermissionKey) -> Result<(), StoreError> {
        self.write(|t| {
            let binding = t
                .bindings
                .iter_mut()
                .find(|b| !b.retired && b.rule_id == rule_id && &b.permission_key == key)
                .ok_or_else(|| DomainError::not_found(format!("binding of '{key}' on rule {rule_id}")))?;
            binding.retired = true;
            Ok(())
        })
    }

    async fn insert_permission_key(&self, row: PermissionKeyRow) -> Result<(), StoreError> {
        self.write(|t| {
            if t.keys.contains_key(&row.id) {
                return Err(DomainError::duplicate(format!("permission key {} already exists", row.id)).into());
            }
            let catalog = t.catalog();
            catalog.check_unique_key(&row.key, None)?;
            catalog.check_placement(None, row.parent_id, row.sort_order)?;
            t.keys.insert(row.id, PermissionKeyRow { retired: false, ..row });
            Ok(())
        })
    }

    async fn update_permission_key(&self, row: PermissionKeyRow) -> Result<(), StoreError> {
        self.write(|t| {
            let catalog = t.catalog();
            let current = catalog
                .get(&row.id)
                .ok_or_else(|| DomainError::not_found(format!("permission key {}", row.id)))?;
            let key = current.key.clone();
            catalog.check_placement(Some(row.id), row.parent_id, row.sort_order)?;
            t.keys.insert(
                row.id,
                PermissionKeyRow {
                    key,
                    retired: false,
                    ..row
                },
            );
            Ok(())
        })
    }

    async fn retire_permission_key(&self, id: PermissionKeyId) -> Result<(), StoreError> {
        self.write(|t| {
            let key = t
                .keys
                .get_mut(&id)
                .filter(|k| !k.retired)
                .ok_or_else(|| DomainError::not_found(format!("permission key {id}")))?;
            key.retired = true;
            let key = key.key.clone();
            for binding in t.bindings.iter_mut().filter(|b| b.permission_key == key) {
                binding.retired = true;
            }
            for grant in t.grants.iter_mut().filter(|g| g.permission_key == key) {
                grant.retired = true;
            }
            Ok(())
        })
    }

    async fn insert_role(&self, row: RoleRow) -> Result<(), StoreError> {
        self.write(|t| {
            if t.roles.contains_key(&row.id) {
                return Err(DomainError::duplicate(format!("role {} already exists", row.id)).into());
            }
            t.check_role_name_free(&row)?;
            t.roles.insert(row.id, RoleRow { retired: false, ..row });
            Ok(())
        })
    }

    async fn update_role(&self, row: RoleRow) -> Result<(), StoreError> {
        self.write(|t| {
            if !t.roles.get(&row.id).is_some_and(|r| !r.retired) {
                return Err(DomainError::not_found(format!("role {}", row.id)).into());
            }
            t.check_role_name_free(&row)?;
            t.roles.insert(row.id, RoleRow { retired: false, ..row });
            Ok(())
        })
    }

    async fn retire_role(&self, id: RoleId) -> Result<(), StoreError> {
        self.write(|t| {
            let role = t
                .roles
                .get_mut(&id)
                .filter(|r| !r.retired)
                .ok_or_else(|| DomainError::not_found(format!("role {id}")))?;
            role.retired = true;
            Ok(())
        })
    }

    async fn grant(&self, row: RoleGrantRow) -> Result<(), StoreError> {
        self.write(|t| {
            if !t.roles.get(&row.role_id).is_some_and(|r| !r.retired) {
                return Err(DomainError::not_found(format!("role {}", row.role_id)).into());
            }
            let granted = t.grants.iter().any(|g| {
                !g.retired && g.role_id == row.role_id && g.permission_key == row.permission_key
            });
            if !granted {
                t.grants.push(RoleGrantRow { retired: false, ..row });
            }
            Ok(())
        })
    }

    async fn revoke(&self, role_id: RoleId, key: &PermissionKey) -> Result<(), StoreError> {
        self.write(|t| {
            let grant = t
                .grants
                .iter_mut()
                .find(|g| !g.retired && g.role_id == role_id && &g.permission_key == key)
                .ok_or_else(|| DomainError::not_found(format!("grant of '{key}' to role {role_id}")))?;
            grant.retired = true;
            Ok(())
        })
    }
}
