//! Startup policy switches for the decision procedure.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use gatehouse_core::DomainError;

/// How multiple enforced bindings on one rule combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingMode {
    /// Every enforced key is required.
    #[default]
    All,
    /// Any one enforced key suffices.
    Any,
}

/// What to do with a request that matches no registered rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    #[default]
    Deny,
    AllowAuthenticated,
}

impl FromStr for BindingMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "and" => Ok(Self::All),
            "any" | "or" => Ok(Self::Any),
            other => Err(DomainError::validation(format!(
                "binding mode must be 'all' or 'any', got '{other}'"
            ))),
        }
    }
}

impl FromStr for UnmatchedPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deny" => Ok(Self::Deny),
            "allow_authenticated" | "allow-authenticated" => Ok(Self::AllowAuthenticated),
            other => Err(DomainError::validation(format!(
                "unmatched policy must be 'deny' or 'allow_authenticated', got '{other}'"
            ))),
        }
    }
}

/// Decision-procedure configuration, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthzPolicy {
    pub binding_mode: BindingMode,
    pub unmatched: UnmatchedPolicy,
    /// Query parameter carrying a permission-key override.
    pub override_param: String,
}

impl Default for AuthzPolicy {
    fn default() -> Self {
        Self {
            binding_mode: BindingMode::All,
            unmatched: UnmatchedPolicy::Deny,
            override_param: "permission".to_string(),
        }
    }
}
