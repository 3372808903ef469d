//! Endpoint registry: exact (path, method) lookup over active rules.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use gatehouse_core::{RuleId, active};

use crate::rule::{EndpointRule, EndpointRuleRow, PermissionBinding, RouteKey, RuleBindingRow};
use crate::PermissionKey;

/// Immutable registry snapshot, rebuilt wholesale whenever rules or bindings change.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    by_route: HashMap<RouteKey, Arc<EndpointRule>>,
    by_id: HashMap<RuleId, Arc<EndpointRule>>,
}

impl EndpointRegistry {
    /// Build from a full scan of rule and binding rows.
    ///
    /// Retired rules, retired bindings and bindings naming a key outside
    /// `live_keys` are left out.
    pub fn build(
        rules: impl IntoIterator<Item = EndpointRuleRow>,
        bindings: impl IntoIterator<Item = RuleBindingRow>,
        live_keys: &HashSet<PermissionKey>,
    ) -> Self {
        let mut bound: HashMap<RuleId, BTreeMap<PermissionKey, bool>> = HashMap::new();
        for b in active(bindings) {
            if !live_keys.contains(&b.permission_key) {
                continue;
            }
            let enforced = bound.entry(b.rule_id).or_default().entry(b.permission_key).or_insert(false);
            *enforced |= b.enforced;
        }

        let mut rows: Vec<EndpointRuleRow> = active(rules).collect();
        rows.sort_by_key(|r| r.id);

        let mut by_route: HashMap<RouteKey, Arc<EndpointRule>> = HashMap::with_capacity(rows.len());
        let mut by_id = HashMap::with_capacity(rows.len());
        for row in rows {
            let route = row.route_key();
            if let Some(existing) = by_route.get(&route) {
                tracing::warn!(
                    route = %route,
                    kept = %existing.id,
                    dropped = %row.id,
                    "two active rules share a route; keeping the oldest"
                );
                continue;
            }

            let bindings = bound
                .remove(&row.id)
                .unwrap_or_default()
                .into_iter()
                .map(|(key, enforced)| PermissionBinding { key, enforced })
                .collect();

            let rule = Arc::new(EndpointRule {
                id: row.id,
                path: row.path,
                method: row.method,
                require_authentication: row.require_authentication,
                description: row.description,
                bindings,
            });
            by_id.insert(rule.id, rule.clone());
            by_route.insert(route, rule);
        }

        Self { by_route, by_id }
    }

    /// Exact match on the normalized (path, method).
    pub fn resolve(&self, path: &str, method: &str) -> Option<Arc<EndpointRule>> {
        self.by_route.get(&RouteKey::normalized(path, method)).cloned()
    }

    pub fn get(&self, id: &RuleId) -> Option<Arc<EndpointRule>> {
        self.by_id.get(id).cloned()
    }

    /// All active rules ordered by (path, method).
    pub fn list(&self) -> Vec<Arc<EndpointRule>> {
        let mut entries: Vec<_> = self.by_route.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_route.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_route.is_empty()
    }
}
