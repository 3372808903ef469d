//! Administrative mutations of rules, permission keys, roles and grants.
//!
//! Each handler delegates to `AuthzAdmin`, which validates, writes and
//! invalidates the affected snapshots before returning. A response therefore
//! implies the next gated request sees the change.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::info;

use gatehouse_core::{PermissionKeyId, RoleId, RuleId};
use gatehouse_infra::{NewPermissionKey, NewRole, NewRule, StoreError};

use crate::app::dto::{
    BindRequest, GrantRequest, IdRequest, UnbindRequest, UpdatePermissionKeyRequest,
    UpdateRoleRequest, UpdateRuleRequest,
};
use crate::app::{errors, services::AppServices};
use crate::context::PrincipalContext;

type Actor = Option<Extension<PrincipalContext>>;

// ─────────────────────────────────────────────────────────────────────────────
// Rules and bindings
// ─────────────────────────────────────────────────────────────────────────────

/// POST /admin/authz/rules
pub async fn create_rule(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<NewRule>,
) -> Response {
    let result = services.admin.create_rule(body).await;
    respond(&actor, "create_rule", StatusCode::CREATED, result)
}

/// POST /admin/authz/rules/update
pub async fn update_rule(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<UpdateRuleRequest>,
) -> Response {
    let result = services.admin.update_rule(body.id, body.changes).await;
    respond(&actor, "update_rule", StatusCode::OK, result)
}

/// POST /admin/authz/rules/retire
pub async fn retire_rule(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<IdRequest<RuleId>>,
) -> Response {
    let result = services.admin.retire_rule(body.id).await;
    respond_empty(&actor, "retire_rule", result)
}

/// POST /admin/authz/rules/bind
pub async fn bind_permission(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<BindRequest>,
) -> Response {
    let result = services
        .admin
        .bind_permission(body.rule_id, &body.permission_key, body.enforced)
        .await;
    respond_empty(&actor, "bind_permission", result)
}

/// POST /admin/authz/rules/unbind
pub async fn unbind_permission(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<UnbindRequest>,
) -> Response {
    let result = services
        .admin
        .unbind_permission(body.rule_id, &body.permission_key)
        .await;
    respond_empty(&actor, "unbind_permission", result)
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission keys
// ─────────────────────────────────────────────────────────────────────────────

/// POST /admin/authz/permissions
pub async fn create_permission_key(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<NewPermissionKey>,
) -> Response {
    let result = services.admin.create_permission_key(body).await;
    respond(&actor, "create_permission_key", StatusCode::CREATED, result)
}

/// POST /admin/authz/permissions/update
pub async fn update_permission_key(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<UpdatePermissionKeyRequest>,
) -> Response {
    let result = services.admin.update_permission_key(body.id, body.changes).await;
    respond(&actor, "update_permission_key", StatusCode::OK, result)
}

/// POST /admin/authz/permissions/retire
pub async fn retire_permission_key(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<IdRequest<PermissionKeyId>>,
) -> Response {
    let result = services.admin.retire_permission_key(body.id).await;
    respond_empty(&actor, "retire_permission_key", result)
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles and grants
// ─────────────────────────────────────────────────────────────────────────────

/// POST /admin/authz/roles
pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<NewRole>,
) -> Response {
    let result = services.admin.create_role(body).await;
    respond(&actor, "create_role", StatusCode::CREATED, result)
}

/// POST /admin/authz/roles/update
pub async fn update_role(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<UpdateRoleRequest>,
) -> Response {
    let result = services.admin.update_role(body.id, body.changes).await;
    respond(&actor, "update_role", StatusCode::OK, result)
}

/// POST /admin/authz/roles/retire
pub async fn retire_role(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<IdRequest<RoleId>>,
) -> Response {
    let result = services.admin.retire_role(body.id).await;
    respond_empty(&actor, "retire_role", result)
}

/// POST /admin/authz/roles/grant
pub async fn grant(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<GrantRequest>,
) -> Response {
    let result = services.admin.grant(body.role_id, &body.permission_key).await;
    respond_empty(&actor, "grant", result)
}

/// POST /admin/authz/roles/revoke
pub async fn revoke(
    Extension(services): Extension<Arc<AppServices>>,
    actor: Actor,
    Json(body): Json<GrantRequest>,
) -> Response {
    let result = services.admin.revoke(body.role_id, &body.permission_key).await;
    respond_empty(&actor, "revoke", result)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn respond<T: Serialize>(
    actor: &Actor,
    action: &'static str,
    status: StatusCode,
    result: Result<T, StoreError>,
) -> Response {
    match result {
        Ok(body) => {
            audit(actor, action);
            (status, Json(body)).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

fn respond_empty(actor: &Actor, action: &'static str, result: Result<(), StoreError>) -> Response {
    match result {
        Ok(()) => {
            audit(actor, action);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

fn audit(actor: &Actor, action: &'static str) {
    let actor = actor
        .as_ref()
        .map(|Extension(p)| p.user_id().to_string())
        .unwrap_or_else(|| "anonymous".to_string());
    info!(target: "gatehouse::admin", %actor, action, "admin mutation applied");
}
