use axum::{
    Router,
    routing::{get, post},
};

pub mod admin;
pub mod authz;
pub mod system;

/// Router for every gated endpoint.
///
/// Reads and writes of the same collection share a path, so both methods are
/// declared on one route here.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/admin/authz/explain", get(authz::explain))
        .route("/admin/authz/cache", get(authz::cache_stats))
        .route("/admin/authz/rules", get(authz::list_rules).post(admin::create_rule))
        .route("/admin/authz/rules/update", post(admin::update_rule))
        .route("/admin/authz/rules/retire", post(admin::retire_rule))
        .route("/admin/authz/rules/bind", post(admin::bind_permission))
        .route("/admin/authz/rules/unbind", post(admin::unbind_permission))
        .route(
            "/admin/authz/permissions",
            get(authz::permission_tree).post(admin::create_permission_key),
        )
        .route("/admin/authz/permissions/children", get(authz::permission_children))
        .route("/admin/authz/permissions/update", post(admin::update_permission_key))
        .route("/admin/authz/permissions/retire", post(admin::retire_permission_key))
        .route("/admin/authz/roles", get(authz::list_roles).post(admin::create_role))
        .route("/admin/authz/roles/update", post(admin::update_role))
        .route("/admin/authz/roles/retire", post(admin::retire_role))
        .route("/admin/authz/roles/grants", get(authz::role_grants))
        .route("/admin/authz/roles/grant", post(admin::grant))
        .route("/admin/authz/roles/revoke", post(admin::revoke))
}
