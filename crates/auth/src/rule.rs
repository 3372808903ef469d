//! Endpoint rules and request-line normalization.

use serde::{Deserialize, Serialize};

use gatehouse_core::{DomainError, DomainResult, Entity, Retirable, RuleId};

use crate::PermissionKey;

/// Longest endpoint path accepted at the admin boundary.
pub const MAX_PATH_LEN: usize = 512;

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Normalize a request or rule path for matching.
///
/// Matching is case-insensitive and ignores a trailing slash; any query string
/// or fragment is dropped. The root path stays `/`.
pub fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim();
    let end = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
    let lowered = trimmed[..end].to_lowercase();
    let stripped = lowered.trim_end_matches('/');

    if stripped.is_empty() {
        "/".to_string()
    } else if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{stripped}")
    }
}

pub fn normalize_method(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Validate a path supplied by an administrator. Storage keeps the original case.
pub fn validate_path(raw: &str) -> DomainResult<String> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('/') {
        return Err(DomainError::validation(format!("path '{trimmed}' must start with '/'")));
    }
    if trimmed.len() > MAX_PATH_LEN {
        return Err(DomainError::validation(format!(
            "path exceeds {MAX_PATH_LEN} characters"
        )));
    }
    if trimmed.contains(['?', '#', '*']) || trimmed.chars().any(char::is_whitespace) {
        return Err(DomainError::validation(format!(
            "path '{trimmed}' must be a literal path (no query, wildcard or whitespace)"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn validate_method(raw: &str) -> DomainResult<String> {
    let method = normalize_method(raw);
    if METHODS.contains(&method.as_str()) {
        Ok(method)
    } else {
        Err(DomainError::validation(format!("unsupported http method '{raw}'")))
    }
}

/// Normalized (path, method) pair used as the registry lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RouteKey {
    pub path: String,
    pub method: String,
}

impl RouteKey {
    pub fn normalized(path: &str, method: &str) -> Self {
        Self {
            path: normalize_path(path),
            method: normalize_method(method),
        }
    }
}

impl core::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// An endpoint rule row as stored by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRuleRow {
    pub id: RuleId,
    pub path: String,
    pub method: String,
    pub require_authentication: bool,
    pub description: Option<String>,
    pub retired: bool,
}

impl EndpointRuleRow {
    pub fn route_key(&self) -> RouteKey {
        RouteKey::normalized(&self.path, &self.method)
    }
}

impl Entity for EndpointRuleRow {
    type Id = RuleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Retirable for EndpointRuleRow {
    fn is_retired(&self) -> bool {
        self.retired
    }
}

/// A permission key bound to a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBindingRow {
    pub rule_id: RuleId,
    pub permission_key: PermissionKey,
    /// Non-enforced bindings are declared capabilities, selectable as an override.
    pub enforced: bool,
    pub retired: bool,
}

impl Retirable for RuleBindingRow {
    fn is_retired(&self) -> bool {
        self.retired
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionBinding {
    pub key: PermissionKey,
    pub enforced: bool,
}

/// A resolved rule: row data plus its live bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointRule {
    pub id: RuleId,
    pub path: String,
    pub method: String,
    pub require_authentication: bool,
    pub description: Option<String>,
    pub bindings: Vec<PermissionBinding>,
}

impl EndpointRule {
    pub fn enforced_keys(&self) -> Vec<PermissionKey> {
        self.bindings
            .iter()
            .filter(|b| b.enforced)
            .map(|b| b.key.clone())
            .collect()
    }

    pub fn has_enforced_bindings(&self) -> bool {
        self.bindings.iter().any(|b| b.enforced)
    }

    /// Neither authentication nor a capability is needed.
    pub fn is_public(&self) -> bool {
        !self.require_authentication && !self.has_enforced_bindings()
    }

    pub fn binds(&self, key: &PermissionKey) -> bool {
        self.bindings.iter().any(|b| &b.key == key)
    }
}
