//! Bootstrap data so a fresh deployment can administer itself.
//!
//! Seeds the `Authz` permission keys, an `Administrator` role holding all of
//! them, and the rules guarding `/whoami` and every `/admin/authz/...` route.

use tracing::info;
use uuid::Uuid;

use gatehouse_auth::{
    EndpointRuleRow, PermissionKey, PermissionKeyRow, RoleGrantRow, RoleRow, RoleStatus,
    RuleBindingRow,
};
use gatehouse_core::{DomainError, PermissionKeyId, RoleId, RuleId};

use crate::authz_store::{AuthzStore, StoreError};

pub const AUTHZ_READ: &str = "Authz.Read";
pub const AUTHZ_WRITE: &str = "Authz.Write";

/// Fixed so tokens can be minted for it before the server first starts.
pub fn administrator_role_id() -> RoleId {
    RoleId::from_uuid(Uuid::from_u128(0x0190_0000_0000_7000_8000_0000_0000_0001))
}

/// (method, path, enforced key). `None` means authentication only.
const ROUTES: &[(&str, &str, Option<&str>)] = &[
    ("GET", "/whoami", None),
    ("GET", "/admin/authz/explain", None),
    ("GET", "/admin/authz/cache", Some(AUTHZ_READ)),
    ("GET", "/admin/authz/rules", Some(AUTHZ_READ)),
    ("POST", "/admin/authz/rules", Some(AUTHZ_WRITE)),
    ("POST", "/admin/authz/rules/update", Some(AUTHZ_WRITE)),
    ("POST", "/admin/authz/rules/retire", Some(AUTHZ_WRITE)),
    ("POST", "/admin/authz/rules/bind", Some(AUTHZ_WRITE)),
    ("POST", "/admin/authz/rules/unbind", Some(AUTHZ_WRITE)),
    ("GET", "/admin/authz/permissions", Some(AUTHZ_READ)),
    ("GET", "/admin/authz/permissions/children", Some(AUTHZ_READ)),
    ("POST", "/admin/authz/permissions", Some(AUTHZ_WRITE)),
    ("POST", "/admin/authz/permissions/update", Some(AUTHZ_WRITE)),
    ("POST", "/admin/authz/permissions/retire", Some(AUTHZ_WRITE)),
    ("GET", "/admin/authz/roles", Some(AUTHZ_READ)),
    ("POST", "/admin/authz/roles", Some(AUTHZ_WRITE)),
    ("POST", "/admin/authz/roles/update", Some(AUTHZ_WRITE)),
    ("POST", "/admin/authz/roles/retire", Some(AUTHZ_WRITE)),
    ("GET", "/admin/authz/roles/grants", Some(AUTHZ_READ)),
    ("POST", "/admin/authz/roles/grant", Some(AUTHZ_WRITE)),
    ("POST", "/admin/authz/roles/revoke", Some(AUTHZ_WRITE)),
];

#[derive(Debug, Clone, Default)]
pub struct SeedData {
    pub permission_keys: Vec<PermissionKeyRow>,
    pub rules: Vec<EndpointRuleRow>,
    pub bindings: Vec<RuleBindingRow>,
    pub roles: Vec<RoleRow>,
    pub grants: Vec<RoleGrantRow>,
}

impl SeedData {
    pub fn admin_defaults() -> Self {
        let root = PermissionKeyId::new();
        let keys = [("Authz", None, 1), (AUTHZ_READ, Some(root), 1), (AUTHZ_WRITE, Some(root), 2)];
        let permission_keys = keys
            .into_iter()
            .map(|(key, parent_id, sort_order)| PermissionKeyRow {
                id: if parent_id.is_none() { root } else { PermissionKeyId::new() },
                key: PermissionKey::new(key),
                display_name: key.to_string(),
                parent_id,
                sort_order,
                retired: false,
            })
            .collect();

        let mut rules = Vec::with_capacity(ROUTES.len());
        let mut bindings = Vec::new();
        for (method, path, key) in ROUTES {
            let id = RuleId::new();
            rules.push(EndpointRuleRow {
                id,
                path: path.to_string(),
                method: method.to_string(),
                require_authentication: true,
                description: None,
                retired: false,
            });
            if let Some(key) = key {
                bindings.push(RuleBindingRow {
                    rule_id: id,
                    permission_key: PermissionKey::new(*key),
                    enforced: true,
                    retired: false,
                });
            }
        }

        let admin = administrator_role_id();
        let grants = ["Authz", AUTHZ_READ, AUTHZ_WRITE]
            .into_iter()
            .map(|key| RoleGrantRow {
                role_id: admin,
                permission_key: PermissionKey::new(key),
                retired: false,
            })
            .collect();

        Self {
            permission_keys,
            rules,
            bindings,
            roles: vec![RoleRow {
                id: admin,
                name: "Administrator".to_string(),
                status: RoleStatus::Active,
                retired: false,
            }],
            grants,
        }
    }
}

/// Write `seed` through the store unless rules already exist.
///
/// Rules are written last, each together with its bindings, so an interrupted
/// run never leaves a seeded route guarded by less than its full rule. Keys,
/// roles and grants already present from such a run are kept as they are.
///
/// Returns whether anything was written.
pub async fn bootstrap<S: AuthzStore + ?Sized>(store: &S, seed: &SeedData) -> Result<bool, StoreError> {
    if !store.active_rules().await?.is_empty() {
        info!("authorization data present; skipping seed");
        return Ok(false);
    }

    for row in &seed.permission_keys {
        keep_existing(store.insert_permission_key(row.clone()).await)?;
    }
    for row in &seed.roles {
        keep_existing(store.insert_role(row.clone()).await)?;
    }
    for row in &seed.grants {
        store.grant(row.clone()).await?;
    }
    for row in &seed.rules {
        let bindings = seed
            .bindings
            .iter()
            .filter(|b| b.rule_id == row.id)
            .cloned()
            .collect();
        store.insert_rule(row.clone(), bindings).await?;
    }

    info!(
        rules = seed.rules.len(),
        permission_keys = seed.permission_keys.len(),
        "authorization data seeded"
    );
    Ok(true)
}

fn keep_existing(result: Result<(), StoreError>) -> Result<(), StoreError> {
    match result {
        Err(StoreError::Domain(DomainError::Duplicate(_))) => Ok(()),
        other => other,
    }
}
