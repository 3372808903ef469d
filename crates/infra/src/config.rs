//! Startup configuration, read from the environment.
//!
//! Parsing is a pure function over a key lookup (`from_lookup`) so every
//! variable can be exercised without touching the process environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use gatehouse_auth::{AuthzPolicy, BindingMode, ErrorCatalog, UnmatchedPolicy};

use crate::indexes::FetchPolicy;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatehouseConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// When set, the Postgres store is used; otherwise the seeded in-memory store.
    pub database_url: Option<String>,
    pub policy: AuthzPolicy,
    pub fetch: FetchPolicy,
    pub errors: ErrorCatalog,
}

impl Default for GatehouseConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            database_url: None,
            policy: AuthzPolicy::default(),
            fetch: FetchPolicy::default(),
            errors: ErrorCatalog::default(),
        }
    }
}

impl GatehouseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let bind_addr = match get("GATEHOUSE_BIND_ADDR") {
            Some(raw) => raw
                .parse()
                .map_err(|e| ConfigError::invalid("GATEHOUSE_BIND_ADDR", &raw, e))?,
            None => defaults.bind_addr,
        };

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let binding_mode = match get("GATEHOUSE_BINDING_MODE") {
            Some(raw) => raw
                .parse::<BindingMode>()
                .map_err(|e| ConfigError::invalid("GATEHOUSE_BINDING_MODE", &raw, e))?,
            None => BindingMode::default(),
        };

        let unmatched = match get("GATEHOUSE_UNMATCHED_POLICY") {
            Some(raw) => raw
                .parse::<UnmatchedPolicy>()
                .map_err(|e| ConfigError::invalid("GATEHOUSE_UNMATCHED_POLICY", &raw, e))?,
            None => UnmatchedPolicy::default(),
        };

        let override_param = match get("GATEHOUSE_OVERRIDE_PARAM") {
            Some(raw) if raw.chars().any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-')) => {
                return Err(ConfigError::invalid(
                    "GATEHOUSE_OVERRIDE_PARAM",
                    &raw,
                    "expected a plain query parameter name",
                ));
            }
            Some(raw) => raw,
            None => defaults.policy.override_param,
        };

        let fetch = FetchPolicy {
            timeout: millis(&get, "GATEHOUSE_STORE_TIMEOUT_MS", defaults.fetch.timeout)?,
            retry_backoff: millis(&get, "GATEHOUSE_RETRY_BACKOFF_MS", defaults.fetch.retry_backoff)?,
        };
        if fetch.timeout.is_zero() {
            return Err(ConfigError::invalid(
                "GATEHOUSE_STORE_TIMEOUT_MS",
                "0",
                "timeout must be positive",
            ));
        }

        let errors = match get("GATEHOUSE_ERROR_MESSAGES") {
            Some(raw) => ErrorCatalog::from_json(&raw)
                .map_err(|e| ConfigError::invalid("GATEHOUSE_ERROR_MESSAGES", &raw, e))?,
            None => ErrorCatalog::default(),
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            database_url: get("DATABASE_URL"),
            policy: AuthzPolicy {
                binding_mode,
                unmatched,
                override_param,
            },
            fetch,
            errors,
        })
    }
}

fn millis(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match get(var) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::invalid(var, &raw, e)),
        None => Ok(default),
    }
}
