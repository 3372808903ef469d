//! Permission-key catalog (display/grouping only).
//!
//! The hierarchy is stored flat: each row carries an optional `parent_id` and
//! child lists are derived once per snapshot. A node whose parent is missing or
//! retired is shown as a root. Nodes caught in a parent cycle have no path from
//! a root, so tree walks can never loop.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use gatehouse_core::{DomainError, DomainResult, PermissionKeyId, active};

use crate::{PermissionKey, PermissionKeyRow};

/// Immutable catalog snapshot built from active permission-key rows.
#[derive(Debug, Clone, Default)]
pub struct PermissionCatalog {
    nodes: HashMap<PermissionKeyId, PermissionKeyRow>,
    by_key: HashMap<PermissionKey, PermissionKeyId>,
    children: HashMap<PermissionKeyId, Vec<PermissionKeyId>>,
    roots: Vec<PermissionKeyId>,
}

/// Nested view for administrative display.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionNode {
    #[serde(flatten)]
    pub row: PermissionKeyRow,
    pub children: Vec<PermissionNode>,
}

impl PermissionCatalog {
    pub fn build(rows: impl IntoIterator<Item = PermissionKeyRow>) -> Self {
        let nodes: HashMap<PermissionKeyId, PermissionKeyRow> =
            active(rows).map(|r| (r.id, r)).collect();

        let by_key = nodes.values().map(|r| (r.key.clone(), r.id)).collect();

        let mut children: HashMap<PermissionKeyId, Vec<PermissionKeyId>> = HashMap::new();
        let mut roots = Vec::new();
        for row in nodes.values() {
            match row.parent_id.filter(|p| nodes.contains_key(p) && *p != row.id) {
                Some(parent) => children.entry(parent).or_default().push(row.id),
                None => roots.push(row.id),
            }
        }

        let order = |ids: &mut Vec<PermissionKeyId>| {
            ids.sort_by(|a, b| {
                let (a, b) = (&nodes[a], &nodes[b]);
                a.sort_order.cmp(&b.sort_order).then_with(|| a.key.cmp(&b.key))
            })
        };
        order(&mut roots);
        for ids in children.values_mut() {
            order(ids);
        }

        Self {
            nodes,
            by_key,
            children,
            roots,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &PermissionKeyId) -> Option<&PermissionKeyRow> {
        self.nodes.get(id)
    }

    pub fn find(&self, key: &PermissionKey) -> Option<&PermissionKeyRow> {
        self.by_key.get(key).and_then(|id| self.nodes.get(id))
    }

    pub fn contains_key(&self, key: &PermissionKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn active_keys(&self) -> HashSet<PermissionKey> {
        self.by_key.keys().cloned().collect()
    }

    pub fn roots(&self) -> Vec<&PermissionKeyRow> {
        self.roots.iter().map(|id| &self.nodes[id]).collect()
    }

    /// Ordered children of a key. Unknown or retired keys have no children.
    pub fn children(&self, id: &PermissionKeyId) -> Vec<&PermissionKeyRow> {
        self.children
            .get(id)
            .map(|ids| ids.iter().map(|c| &self.nodes[c]).collect())
            .unwrap_or_default()
    }

    pub fn tree(&self) -> Vec<PermissionNode> {
        self.roots.iter().map(|id| self.subtree(id)).collect()
    }

    fn subtree(&self, id: &PermissionKeyId) -> PermissionNode {
        PermissionNode {
            row: self.nodes[id].clone(),
            children: self
                .children
                .get(id)
                .map(|ids| ids.iter().map(|c| self.subtree(c)).collect())
                .unwrap_or_default(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Admin-boundary checks (run against the active rows before a write)
    // ─────────────────────────────────────────────────────────────────────

    /// Reject a key string already used by another active row.
    pub fn check_unique_key(
        &self,
        key: &PermissionKey,
        exclude: Option<PermissionKeyId>,
    ) -> DomainResult<()> {
        match self.by_key.get(key) {
            Some(existing) if Some(*existing) != exclude => Err(DomainError::duplicate(format!(
                "permission key '{key}' already exists"
            ))),
            _ => Ok(()),
        }
    }

    /// Validate placing `id` (or a new row when `None`) under `parent_id` at `sort_order`.
    pub fn check_placement(
        &self,
        id: Option<PermissionKeyId>,
        parent_id: Option<PermissionKeyId>,
        sort_order: i32,
    ) -> DomainResult<()> {
        if let Some(parent) = parent_id {
            if !self.nodes.contains_key(&parent) {
                return Err(DomainError::not_found(format!("parent permission key {parent}")));
            }
            if let Some(id) = id {
                self.check_not_ancestor(id, parent)?;
            }
        }

        let collision = self.nodes.values().any(|row| {
            Some(row.id) != id && row.parent_id == parent_id && row.sort_order == sort_order
        });
        if collision {
            return Err(DomainError::ordering(format!(
                "sort order {sort_order} is already used by a sibling"
            )));
        }
        Ok(())
    }

    fn check_not_ancestor(&self, id: PermissionKeyId, parent: PermissionKeyId) -> DomainResult<()> {
        let mut cursor = Some(parent);
        let mut steps = 0;
        while let Some(current) = cursor {
            if current == id {
                return Err(DomainError::validation(
                    "a permission key cannot be moved under itself or its descendants",
                ));
            }
            steps += 1;
            if steps > self.nodes.len() {
                break;
            }
            cursor = self.nodes.get(&current).and_then(|r| r.parent_id);
        }
        Ok(())
    }
}
