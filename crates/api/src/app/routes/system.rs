use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::app::errors;
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(principal: Option<Extension<PrincipalContext>>) -> Response {
    // The seeded rule requires authentication, but an administrator may relax it.
    let Some(Extension(principal)) = principal else {
        return errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "no authenticated principal");
    };

    Json(serde_json::json!({
        "user_id": principal.user_id().to_string(),
        "role_ids": principal.role_ids().iter().map(|r| r.to_string()).collect::<Vec<_>>(),
        "expires_at": principal.principal().expires_at,
    }))
    .into_response()
}

/// Reached only for allowed requests with no matching route.
pub async fn not_found() -> Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", "no such route")
}
