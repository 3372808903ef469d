//! `gatehouse-auth` — pure authorization model (no IO, no transport).
//!
//! Everything here operates on already-loaded rows and immutable snapshots.
//! Loading, caching and HTTP wiring live in `gatehouse-infra` / `gatehouse-api`.

pub mod authorize;
pub mod catalog;
pub mod claims;
pub mod explain;
pub mod grants;
pub mod messages;
pub mod permissions;
pub mod policy;
pub mod principal;
pub mod registry;
pub mod roles;
pub mod rule;

pub use authorize::{
    DenyCause, DenyKind, GrantCheck, RequestContext, RuleCheck, Verdict, authorize, check_grants,
    check_rule,
};
pub use catalog::{PermissionCatalog, PermissionNode};
pub use claims::{Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError, validate_claims};
pub use explain::{DecisionExplanation, explain};
pub use grants::{EffectiveGrants, RoleGrants};
pub use messages::{Denial, ErrorCatalog, ErrorEntry};
pub use permissions::{PermissionKey, PermissionKeyRow};
pub use policy::{AuthzPolicy, BindingMode, UnmatchedPolicy};
pub use principal::UserPrincipal;
pub use registry::EndpointRegistry;
pub use roles::{RoleGrantRow, RoleRow, RoleStatus};
pub use rule::{EndpointRule, EndpointRuleRow, PermissionBinding, RouteKey, RuleBindingRow};
