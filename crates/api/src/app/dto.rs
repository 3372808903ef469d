//! Request/response DTOs for the admin surface.
//!
//! Routes are matched exactly, so identifiers travel in the JSON body (for
//! mutations) or the query string (for reads) rather than the path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_auth::{EndpointRule, PermissionNode};
use gatehouse_core::{PermissionKeyId, RoleId, RuleId};
use gatehouse_infra::{PermissionKeyUpdate, RoleUpdate, RuleUpdate};

fn default_true() -> bool {
    true
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct IdRequest<T> {
    pub id: T,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRuleRequest {
    pub id: RuleId,
    #[serde(flatten)]
    pub changes: RuleUpdate,
}

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    pub rule_id: RuleId,
    pub permission_key: String,
    #[serde(default = "default_true")]
    pub enforced: bool,
}

#[derive(Debug, Deserialize)]
pub struct UnbindRequest {
    pub rule_id: RuleId,
    pub permission_key: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePermissionKeyRequest {
    pub id: PermissionKeyId,
    #[serde(flatten)]
    pub changes: PermissionKeyUpdate,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub id: RoleId,
    #[serde(flatten)]
    pub changes: RoleUpdate,
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub role_id: RoleId,
    pub permission_key: String,
}

#[derive(Debug, Deserialize)]
pub struct ChildrenQuery {
    pub id: PermissionKeyId,
}

#[derive(Debug, Deserialize)]
pub struct RoleGrantsQuery {
    pub role_id: RoleId,
}

/// `GET /admin/authz/explain?path=..&method=..[&permission=..]`
///
/// Explains the decision for the caller's own principal.
#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Value to pass as the override query parameter of the explained request.
    pub permission: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

// -------------------------
// Response DTOs
// -------------------------

/// A response built from a cached snapshot, tagged with the snapshot version.
#[derive(Debug, Serialize)]
pub struct SnapshotView<T> {
    pub version: u64,
    pub built_at: DateTime<Utc>,
    #[serde(flatten)]
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct RuleList<'a> {
    pub rules: Vec<&'a EndpointRule>,
}

#[derive(Debug, Serialize)]
pub struct PermissionTree {
    pub permissions: Vec<PermissionNode>,
}
