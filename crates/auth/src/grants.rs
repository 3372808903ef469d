//! Role grants and their union across a principal's roles.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use gatehouse_core::{RoleId, active};

use crate::{PermissionKey, RoleGrantRow, RoleRow, RoleStatus};

/// Flattened grants of one role (one cache entry of the grant index).
///
/// Grants are exact keys; nothing is inherited from the catalog hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleGrants {
    pub role_id: RoleId,
    /// `None` when the role does not exist or is retired.
    pub name: Option<String>,
    pub status: Option<RoleStatus>,
    pub keys: BTreeSet<PermissionKey>,
}

impl RoleGrants {
    pub fn build(
        role_id: RoleId,
        role: Option<RoleRow>,
        grants: impl IntoIterator<Item = RoleGrantRow>,
        live_keys: &HashSet<PermissionKey>,
    ) -> Self {
        let Some(role) = role.filter(|r| !r.retired && r.id == role_id) else {
            return Self::absent(role_id);
        };

        let keys = active(grants)
            .filter(|g| g.role_id == role_id && live_keys.contains(&g.permission_key))
            .map(|g| g.permission_key)
            .collect();

        Self {
            role_id,
            name: Some(role.name),
            status: Some(role.status),
            keys,
        }
    }

    pub fn absent(role_id: RoleId) -> Self {
        Self {
            role_id,
            name: None,
            status: None,
            keys: BTreeSet::new(),
        }
    }

    /// The role does not exist or is retired.
    pub fn is_absent(&self) -> bool {
        self.name.is_none()
    }

    /// Only existing, active roles contribute to effective grants.
    pub fn contributes(&self) -> bool {
        self.status == Some(RoleStatus::Active)
    }
}

/// Union of grants over a principal's contributing roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectiveGrants {
    pub roles: Vec<RoleId>,
    pub keys: BTreeSet<PermissionKey>,
}

impl EffectiveGrants {
    pub fn union<'a>(grants: impl IntoIterator<Item = &'a RoleGrants>) -> Self {
        let mut out = Self::default();
        for g in grants.into_iter().filter(|g| g.contributes()) {
            out.roles.push(g.role_id);
            out.keys.extend(g.keys.iter().cloned());
        }
        out
    }

    pub fn contains(&self, key: &PermissionKey) -> bool {
        self.keys.contains(key)
    }

    /// Required keys not covered by these grants (in input order).
    pub fn missing(&self, required: &[PermissionKey]) -> Vec<PermissionKey> {
        required.iter().filter(|k| !self.contains(k)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, status: RoleStatus) -> RoleRow {
        RoleRow {
            id: RoleId::new(),
            name: name.to_string(),
            status,
            retired: false,
        }
    }

    fn grant(role_id: RoleId, key: &str) -> RoleGrantRow {
        RoleGrantRow {
            role_id,
            permission_key: PermissionKey::new(key.to_string()),
            retired: false,
        }
    }

    fn live(names: &[&str]) -> HashSet<PermissionKey> {
        names.iter().map(|k| PermissionKey::new(k.to_string())).collect()
    }

    #[test]
    fn union_skips_inactive_retired_and_missing_roles() {
        let live = live(&["News.Create", "News.Update", "News.View", "Users.Manage"]);

        let editor = role("Editor", RoleStatus::Active);
        let editor_grants = RoleGrants::build(
            editor.id,
            Some(editor.clone()),
            vec![grant(editor.id, "News.Create"), grant(editor.id, "News.Update")],
            &live,
        );

        let dormant = role("Dormant", RoleStatus::Inactive);
        let dormant_grants =
            RoleGrants::build(dormant.id, Some(dormant.clone()), vec![grant(dormant.id, "Users.Manage")], &live);

        let mut gone = role("Gone", RoleStatus::Active);
        gone.retired = true;
        let gone_grants = RoleGrants::build(gone.id, Some(gone.clone()), vec![grant(gone.id, "News.View")], &live);

        let missing = RoleGrants::absent(RoleId::new());

        let effective = EffectiveGrants::union([&editor_grants, &dormant_grants, &gone_grants, &missing]);
        assert_eq!(effective.roles, vec![editor.id]);
        assert_eq!(effective.keys.len(), 2);
        assert!(effective.contains(&PermissionKey::new("News.Create")));
        assert!(!effective.contains(&PermissionKey::new("Users.Manage")));
        assert!(!effective.contains(&PermissionKey::new("News.View")));
        // The inactive role still lists its grants for introspection.
        assert_eq!(dormant_grants.keys.len(), 1);
    }

    #[test]
    fn grants_on_retired_keys_are_dropped() {
        let editor = role("Editor", RoleStatus::Active);
        let mut retired = grant(editor.id, "News.Update");
        retired.retired = true;
        let grants = RoleGrants::build(
            editor.id,
            Some(editor.clone()),
            vec![grant(editor.id, "News.Create"), grant(editor.id, "Old.Key"), retired],
            &live(&["News.Create", "News.Update"]),
        );
        assert_eq!(grants.keys.iter().map(|k| k.as_str()).collect::<Vec<_>>(), vec!["News.Create"]);
    }

    #[test]
    fn missing_reports_uncovered_keys() {
        let editor = role("Editor", RoleStatus::Active);
        let grants = RoleGrants::build(
            editor.id,
            Some(editor.clone()),
            vec![grant(editor.id, "A")],
            &live(&["A", "B"]),
        );
        let effective = EffectiveGrants::union([&grants]);
        let required = vec![PermissionKey::new("A"), PermissionKey::new("B")];
        assert_eq!(effective.missing(&required), vec![PermissionKey::new("B")]);
    }
}
