//! Read-only introspection of the authorization state.
//!
//! Everything here is served from the same snapshots the gate decides on.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use gatehouse_auth::RequestContext;

use crate::app::dto::{
    ChildrenQuery, ExplainQuery, PermissionTree, RoleGrantsQuery, RuleList, SnapshotView,
};
use crate::app::{errors, services::AppServices};
use crate::context::PrincipalContext;

/// GET /admin/authz/rules
pub async fn list_rules(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let registry = match services.engine.indexes().registry().await {
        Ok(registry) => registry,
        Err(e) => return errors::store_error_to_response(e),
    };

    let rules = registry.list();
    Json(SnapshotView {
        version: registry.version,
        built_at: registry.built_at,
        data: RuleList {
            rules: rules.iter().map(|r| r.as_ref()).collect(),
        },
    })
    .into_response()
}

/// GET /admin/authz/permissions
pub async fn permission_tree(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.engine.indexes().catalog().await {
        Ok(catalog) => Json(SnapshotView {
            version: catalog.version,
            built_at: catalog.built_at,
            data: PermissionTree {
                permissions: catalog.tree(),
            },
        })
        .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /admin/authz/permissions/children?id=..
pub async fn permission_children(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ChildrenQuery>,
) -> Response {
    let catalog = match services.engine.indexes().catalog().await {
        Ok(catalog) => catalog,
        Err(e) => return errors::store_error_to_response(e),
    };

    if catalog.get(&query.id).is_none() {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "permission key not found");
    }
    Json(catalog.children(&query.id)).into_response()
}

/// GET /admin/authz/roles
pub async fn list_roles(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.admin.list_roles().await {
        Ok(roles) => Json(roles).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /admin/authz/roles/grants?role_id=..
///
/// Unknown or retired roles come back with no keys rather than 404; that is
/// exactly what the gate sees for them.
pub async fn role_grants(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<RoleGrantsQuery>,
) -> Response {
    match services.engine.indexes().role_grants(query.role_id).await {
        Ok(grants) => Json(SnapshotView {
            version: grants.version,
            built_at: grants.built_at,
            data: grants.value(),
        })
        .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /admin/authz/explain?path=..&method=..[&permission=..]
pub async fn explain(
    Extension(services): Extension<Arc<AppServices>>,
    principal: Option<Extension<PrincipalContext>>,
    Query(query): Query<ExplainQuery>,
) -> Response {
    let mut ctx = RequestContext::new(query.path, query.method);
    if let Some(value) = query.permission {
        ctx = ctx.with_query(services.engine.policy().override_param.clone(), value);
    }
    if let Some(Extension(principal)) = principal {
        ctx = ctx.with_principal(principal.principal().clone());
    }

    match services.engine.explain(&ctx).await {
        Ok(explanation) => Json(explanation).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /admin/authz/cache
pub async fn cache_stats(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.engine.indexes().caches().stats())
}
