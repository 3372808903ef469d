use gatehouse_auth::UserPrincipal;
use gatehouse_core::{RoleId, UserId};

/// Principal context for an allowed request.
///
/// Only inserted when the gate allowed the request and the caller presented a
/// valid token; public routes may run without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: UserPrincipal,
}

impl PrincipalContext {
    pub fn new(principal: UserPrincipal) -> Self {
        Self { principal }
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn role_ids(&self) -> &[RoleId] {
        &self.principal.role_ids
    }

    pub fn principal(&self) -> &UserPrincipal {
        &self.principal
    }
}
