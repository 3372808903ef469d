//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and the shared engine/admin
//! - `routes/`: HTTP handlers (introspection in `authz.rs`, mutations in `admin.rs`)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use gatehouse_auth::Hs256JwtValidator;
use gatehouse_infra::{AuthzStore, GatehouseConfig};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: GatehouseConfig) -> anyhow::Result<Router> {
    let services = Arc::new(services::build_services(&config).await?);
    Ok(router_with_services(services, &config))
}

/// Build the router over an explicit store (tests, embedding).
pub fn build_app_with_store(config: &GatehouseConfig, store: Arc<dyn AuthzStore>) -> Router {
    let services = Arc::new(services::AppServices::new(store, config));
    router_with_services(services, config)
}

fn router_with_services(services: Arc<services::AppServices>, config: &GatehouseConfig) -> Router {
    let jwt = Arc::new(Hs256JwtValidator::new(config.jwt_secret.clone().into_bytes()));
    let gate = middleware::GateState {
        jwt,
        engine: services.engine.clone(),
    };

    // The gate also wraps the fallback, so unknown paths are decided like any
    // other request. `/health` is added after the layer and bypasses it.
    routes::router()
        .fallback(routes::system::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services))
                .layer(axum::middleware::from_fn_with_state(
                    gate,
                    middleware::authorization_gate,
                )),
        )
        .route("/health", get(routes::system::health))
}
