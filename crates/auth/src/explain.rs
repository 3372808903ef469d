//! Authorization explanation (audit trail).
//!
//! Answers "why was this request allowed/denied?" with the same procedure the
//! gate runs, plus the state it looked at.

use chrono::{DateTime, Utc};
use serde::Serialize;

use gatehouse_core::{RoleId, RuleId, UserId};

use crate::authorize::{RuleCheck, Verdict, check_grants, check_rule};
use crate::{AuthzPolicy, DenyCause, EffectiveGrants, EndpointRule, RequestContext};

#[derive(Debug, Clone, Serialize)]
pub struct DecisionExplanation {
    pub path: String,
    pub method: String,
    pub matched_rule: Option<RuleSummary>,
    pub principal: Option<PrincipalState>,
    pub required: Vec<String>,
    pub overridden: bool,
    pub effective_permissions: Vec<String>,
    pub missing: Vec<String>,
    pub verdict: Verdict,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub id: RuleId,
    pub path: String,
    pub method: String,
    pub require_authentication: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub user_id: UserId,
    pub role_ids: Vec<RoleId>,
    pub contributing_roles: Vec<RoleId>,
    pub valid: bool,
}

/// Explain a decision given the principal's already-loaded effective grants.
pub fn explain(
    rule: Option<&EndpointRule>,
    ctx: &RequestContext,
    policy: &AuthzPolicy,
    now: DateTime<Utc>,
    effective: &EffectiveGrants,
) -> DecisionExplanation {
    let (verdict, required, overridden) = match check_rule(rule, ctx, policy, now) {
        RuleCheck::Done(v) => (v, Vec::new(), false),
        RuleCheck::NeedsGrants(check) => (
            check_grants(&check, effective, policy.binding_mode),
            check.required,
            check.overridden,
        ),
    };

    let missing: Vec<String> = effective
        .missing(&required)
        .into_iter()
        .map(|k| k.to_string())
        .collect();

    DecisionExplanation {
        path: ctx.path.clone(),
        method: ctx.method.clone(),
        matched_rule: rule.map(|r| RuleSummary {
            id: r.id,
            path: r.path.clone(),
            method: r.method.clone(),
            require_authentication: r.require_authentication,
        }),
        principal: ctx.principal.as_ref().map(|p| PrincipalState {
            user_id: p.user_id,
            role_ids: p.role_ids.clone(),
            contributing_roles: effective.roles.clone(),
            valid: p.is_valid_at(now),
        }),
        required: required.iter().map(|k| k.to_string()).collect(),
        overridden,
        effective_permissions: effective.keys.iter().map(|k| k.to_string()).collect(),
        reason: reason(verdict, rule, &missing),
        missing,
        verdict,
    }
}

fn reason(verdict: Verdict, rule: Option<&EndpointRule>, missing: &[String]) -> String {
    match (verdict, rule) {
        (Verdict::Allow, None) => "no rule matched; unmatched policy allows authenticated callers".to_string(),
        (Verdict::Allow, Some(r)) if r.is_public() => "rule is public".to_string(),
        (Verdict::Allow, Some(r)) if !r.has_enforced_bindings() => {
            "rule only requires authentication".to_string()
        }
        (Verdict::Allow, Some(_)) => "principal holds the required permissions".to_string(),
        (Verdict::Deny(cause), _) => match cause {
            DenyCause::MissingPrincipal => "rule requires an authenticated principal".to_string(),
            DenyCause::InvalidPrincipal => "principal is expired or not yet valid".to_string(),
            DenyCause::RuleNotFound => "no rule matched and unmatched requests are denied".to_string(),
            DenyCause::MissingPermission => format!("missing required permissions: {missing:?}"),
            DenyCause::OverrideNotBound => {
                "requested permission override is not bound to this rule".to_string()
            }
            DenyCause::StoreUnavailable => "authorization data could not be loaded".to_string(),
        },
    }
}
