//! The per-request decision procedure.
//!
//! `Start → RuleResolved → AuthChecked → PermissionChecked → {Allow | Deny}`
//!
//! The procedure is split at the only point that needs more data: once a rule
//! is resolved and the principal checked, [`check_rule`] either finishes the
//! decision or hands back a [`GrantCheck`] that needs the caller's effective
//! grants. Loading those grants is the caller's business.
//!
//! - No IO
//! - No panics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{RoleId, RuleId, UserId};

use crate::{
    AuthzPolicy, BindingMode, EffectiveGrants, EndpointRule, PermissionKey, UnmatchedPolicy,
    UserPrincipal,
};

/// Transport-independent view of an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub path: String,
    pub method: String,
    pub query: Vec<(String, String)>,
    pub principal: Option<UserPrincipal>,
}

impl RequestContext {
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_principal(mut self, principal: UserPrincipal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// First value of a query parameter (names match exactly).
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.principal.as_ref().map(|p| p.user_id)
    }
}

/// Outcome class of a denial; maps 1:1 onto an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyKind {
    Unauthorized,
    Forbidden,
    InternalError,
}

impl DenyKind {
    pub fn status_code(&self) -> u16 {
        match self {
            DenyKind::Unauthorized => 401,
            DenyKind::Forbidden => 403,
            DenyKind::InternalError => 500,
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyCause {
    MissingPrincipal,
    InvalidPrincipal,
    RuleNotFound,
    MissingPermission,
    OverrideNotBound,
    StoreUnavailable,
}

impl DenyCause {
    pub const ALL: [DenyCause; 6] = [
        DenyCause::MissingPrincipal,
        DenyCause::InvalidPrincipal,
        DenyCause::RuleNotFound,
        DenyCause::MissingPermission,
        DenyCause::OverrideNotBound,
        DenyCause::StoreUnavailable,
    ];

    pub fn kind(&self) -> DenyKind {
        match self {
            DenyCause::MissingPrincipal | DenyCause::InvalidPrincipal => DenyKind::Unauthorized,
            DenyCause::RuleNotFound | DenyCause::MissingPermission | DenyCause::OverrideNotBound => {
                DenyKind::Forbidden
            }
            DenyCause::StoreUnavailable => DenyKind::InternalError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "cause")]
pub enum Verdict {
    Allow,
    Deny(DenyCause),
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Remaining work once the rule and principal are settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantCheck {
    pub rule_id: RuleId,
    pub user_id: UserId,
    pub role_ids: Vec<RoleId>,
    pub required: Vec<PermissionKey>,
    /// `required` came from a caller-selected override, not the enforced bindings.
    pub overridden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleCheck {
    Done(Verdict),
    NeedsGrants(GrantCheck),
}

/// Steps 2–6: everything that does not need the caller's grants.
pub fn check_rule(
    rule: Option<&EndpointRule>,
    ctx: &RequestContext,
    policy: &AuthzPolicy,
    now: DateTime<Utc>,
) -> RuleCheck {
    let Some(rule) = rule else {
        return RuleCheck::Done(match policy.unmatched {
            UnmatchedPolicy::Deny => Verdict::Deny(DenyCause::RuleNotFound),
            UnmatchedPolicy::AllowAuthenticated => match principal_check(ctx, now) {
                Ok(_) => Verdict::Allow,
                Err(cause) => Verdict::Deny(cause),
            },
        });
    };

    if rule.is_public() {
        return RuleCheck::Done(Verdict::Allow);
    }

    let principal = match principal_check(ctx, now) {
        Ok(p) => p,
        Err(cause) => return RuleCheck::Done(Verdict::Deny(cause)),
    };

    if !rule.has_enforced_bindings() {
        return RuleCheck::Done(Verdict::Allow);
    }

    let (required, overridden) = match ctx.query_value(&policy.override_param) {
        Some(raw) => match PermissionKey::parse(raw) {
            Ok(key) if rule.binds(&key) => (vec![key], true),
            _ => return RuleCheck::Done(Verdict::Deny(DenyCause::OverrideNotBound)),
        },
        None => (rule.enforced_keys(), false),
    };

    RuleCheck::NeedsGrants(GrantCheck {
        rule_id: rule.id,
        user_id: principal.user_id,
        role_ids: principal.role_ids.clone(),
        required,
        overridden,
    })
}

/// Compare the required keys against the caller's effective grants.
pub fn check_grants(check: &GrantCheck, effective: &EffectiveGrants, mode: BindingMode) -> Verdict {
    let satisfied = match mode {
        BindingMode::All => check.required.iter().all(|k| effective.contains(k)),
        BindingMode::Any => check.required.iter().any(|k| effective.contains(k)),
    };

    if satisfied {
        Verdict::Allow
    } else {
        Verdict::Deny(DenyCause::MissingPermission)
    }
}

/// Run the whole procedure with grants supplied synchronously.
pub fn authorize<F>(
    rule: Option<&EndpointRule>,
    ctx: &RequestContext,
    policy: &AuthzPolicy,
    now: DateTime<Utc>,
    effective_grants: F,
) -> Verdict
where
    F: FnOnce(&[RoleId]) -> EffectiveGrants,
{
    match check_rule(rule, ctx, policy, now) {
        RuleCheck::Done(verdict) => verdict,
        RuleCheck::NeedsGrants(check) => {
            let effective = effective_grants(&check.role_ids);
            check_grants(&check, &effective, policy.binding_mode)
        }
    }
}

fn principal_check(ctx: &RequestContext, now: DateTime<Utc>) -> Result<&UserPrincipal, DenyCause> {
    let principal = ctx.principal.as_ref().ok_or(DenyCause::MissingPrincipal)?;
    principal
        .validate(now)
        .map_err(|_| DenyCause::InvalidPrincipal)?;
    Ok(principal)
}
