//! The authorization gate, run in front of every route except `/health`.
//!
//! A missing or unverifiable bearer token is not rejected here; the request is
//! decided without a principal and the rule decides whether that matters.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, Uri},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

use gatehouse_auth::{JwtValidator, RequestContext, UserPrincipal};
use gatehouse_infra::{AuthorizationEngine, AuthzStore, Decision};

use crate::app::errors;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct GateState {
    pub jwt: Arc<dyn JwtValidator>,
    pub engine: AuthorizationEngine<dyn AuthzStore>,
}

pub async fn authorization_gate(
    State(state): State<GateState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let principal = bearer_principal(state.jwt.as_ref(), req.headers());

    let ctx = RequestContext {
        path: req.uri().path().to_string(),
        method: req.method().as_str().to_string(),
        query: query_pairs(req.uri()),
        principal: principal.clone(),
    };

    match state.engine.decide(&ctx).await {
        Decision::Allow => {
            if let Some(principal) = principal {
                req.extensions_mut().insert(PrincipalContext::new(principal));
            }
            next.run(req).await
        }
        Decision::Deny(denial) => errors::denial_response(&denial),
    }
}

fn bearer_principal(jwt: &dyn JwtValidator, headers: &HeaderMap) -> Option<UserPrincipal> {
    let token = extract_bearer(headers)?;
    match jwt.validate(token, Utc::now()) {
        Ok(claims) => Some(claims.into()),
        Err(err) => {
            debug!(error = %err, "bearer token rejected");
            None
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

/// Decoded query pairs in order. An undecodable query string counts as empty.
fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    Query::<Vec<(String, String)>>::try_from_uri(uri)
        .map(|Query(pairs)| pairs)
        .unwrap_or_default()
}
