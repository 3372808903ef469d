//! Store selection and engine/admin wiring.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use gatehouse_infra::{
    AuthorizationEngine, AuthzAdmin, AuthzCaches, AuthzIndexes, AuthzStore, GatehouseConfig,
    InMemoryAuthzStore, PostgresAuthzStore, SeedData, bootstrap,
};

/// Everything the handlers and the gate share. Engine and admin share one
/// set of caches, so admin writes invalidate what the gate reads.
pub struct AppServices {
    pub engine: AuthorizationEngine<dyn AuthzStore>,
    pub admin: AuthzAdmin<dyn AuthzStore>,
}

impl AppServices {
    pub fn new(store: Arc<dyn AuthzStore>, config: &GatehouseConfig) -> Self {
        let caches = Arc::new(AuthzCaches::new());
        let indexes = Arc::new(AuthzIndexes::new(
            Arc::clone(&store),
            Arc::clone(&caches),
            config.fetch,
        ));
        let engine = AuthorizationEngine::new(
            indexes,
            config.policy.clone(),
            Arc::new(config.errors.clone()),
        );
        let admin = AuthzAdmin::new(store, caches);

        Self { engine, admin }
    }
}

/// Postgres when `DATABASE_URL` is configured, otherwise an in-memory store
/// seeded with the admin defaults.
pub async fn build_services(config: &GatehouseConfig) -> anyhow::Result<AppServices> {
    let store: Arc<dyn AuthzStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresAuthzStore::connect(url)
                .await
                .context("failed to connect to the authorization database")?;
            bootstrap(&store, &SeedData::admin_defaults())
                .await
                .context("failed to seed authorization data")?;
            info!("using postgres authorization store");
            Arc::new(store)
        }
        None => {
            info!("DATABASE_URL not set; using seeded in-memory authorization store");
            Arc::new(InMemoryAuthzStore::seeded())
        }
    };

    Ok(AppServices::new(store, config))
}
