//! The per-request authorization gate.
//!
//! `AuthorizationEngine` loads the snapshots a decision needs, runs the pure
//! decision procedure from `gatehouse-auth` and renders denials through the
//! configured error catalog. Any failure to load data fails closed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use gatehouse_auth::{
    AuthzPolicy, DecisionExplanation, Denial, DenyCause, EffectiveGrants, EndpointRule,
    ErrorCatalog, PermissionKey, RequestContext, RuleCheck, Verdict, check_grants, check_rule,
    explain,
};

use crate::authz_store::{AuthzStore, StoreError};
use crate::indexes::AuthzIndexes;

/// Outcome of the gate for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny(Denial),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Decision::Allow => None,
            Decision::Deny(denial) => Some(denial),
        }
    }
}

struct Evaluation {
    rule: Option<Arc<EndpointRule>>,
    required: Vec<PermissionKey>,
    verdict: Verdict,
}

pub struct AuthorizationEngine<S: AuthzStore + ?Sized> {
    indexes: Arc<AuthzIndexes<S>>,
    policy: AuthzPolicy,
    errors: Arc<ErrorCatalog>,
}

impl<S: AuthzStore + ?Sized> Clone for AuthorizationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            indexes: Arc::clone(&self.indexes),
            policy: self.policy.clone(),
            errors: Arc::clone(&self.errors),
        }
    }
}

impl<S: AuthzStore + ?Sized> AuthorizationEngine<S> {
    pub fn new(indexes: Arc<AuthzIndexes<S>>, policy: AuthzPolicy, errors: Arc<ErrorCatalog>) -> Self {
        Self {
            indexes,
            policy,
            errors,
        }
    }

    pub fn indexes(&self) -> &Arc<AuthzIndexes<S>> {
        &self.indexes
    }

    pub fn policy(&self) -> &AuthzPolicy {
        &self.policy
    }

    pub fn errors(&self) -> &ErrorCatalog {
        &self.errors
    }

    pub async fn decide(&self, ctx: &RequestContext) -> Decision {
        self.decide_at(ctx, Utc::now()).await
    }

    /// Decide with an explicit clock (principal validity is checked against `now`).
    pub async fn decide_at(&self, ctx: &RequestContext, now: DateTime<Utc>) -> Decision {
        let evaluation = match self.evaluate(ctx, now).await {
            Ok(evaluation) => evaluation,
            Err(err) => {
                error!(
                    path = %ctx.path,
                    method = %ctx.method,
                    error = %err,
                    "authorization data unavailable; denying"
                );
                Evaluation {
                    rule: None,
                    required: Vec::new(),
                    verdict: Verdict::Deny(DenyCause::StoreUnavailable),
                }
            }
        };

        let decision = match evaluation.verdict {
            Verdict::Allow => Decision::Allow,
            Verdict::Deny(cause) => Decision::Deny(self.errors.deny(cause)),
        };
        log_decision(ctx, &evaluation, &decision);
        decision
    }

    /// Same procedure as `decide`, returning the state it looked at.
    pub async fn explain(&self, ctx: &RequestContext) -> Result<DecisionExplanation, StoreError> {
        let now = Utc::now();
        let rule = self.indexes.resolve(&ctx.path, &ctx.method).await?;
        let effective = match &ctx.principal {
            Some(principal) => self.indexes.effective_grants(&principal.role_ids).await?,
            None => EffectiveGrants::default(),
        };
        Ok(explain(rule.as_deref(), ctx, &self.policy, now, &effective))
    }

    async fn evaluate(&self, ctx: &RequestContext, now: DateTime<Utc>) -> Result<Evaluation, StoreError> {
        let rule = self.indexes.resolve(&ctx.path, &ctx.method).await?;
        match check_rule(rule.as_deref(), ctx, &self.policy, now) {
            RuleCheck::Done(verdict) => Ok(Evaluation {
                rule,
                required: Vec::new(),
                verdict,
            }),
            RuleCheck::NeedsGrants(check) => {
                let effective = self.indexes.effective_grants(&check.role_ids).await?;
                let verdict = check_grants(&check, &effective, self.policy.binding_mode);
                Ok(Evaluation {
                    rule,
                    required: check.required,
                    verdict,
                })
            }
        }
    }
}

fn log_decision(ctx: &RequestContext, evaluation: &Evaluation, decision: &Decision) {
    let required: Vec<&str> = evaluation.required.iter().map(|k| k.as_str()).collect();
    let rule_id = evaluation.rule.as_ref().map(|r| r.id.to_string());
    let user_id = ctx.user_id().map(|u| u.to_string());
    let (outcome, code) = match decision {
        Decision::Allow => ("allow", None),
        Decision::Deny(denial) => ("deny", Some(denial.code.as_str())),
    };

    info!(
        target: "gatehouse::decision",
        rule_id = rule_id.as_deref(),
        path = %ctx.path,
        method = %ctx.method,
        user_id = user_id.as_deref(),
        required = ?required,
        decision = outcome,
        code,
        "authorization decision"
    );
}
