use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{RoleId, UserId};

use crate::claims::{JwtClaims, TokenValidationError, validate_window};

/// A verified caller, as supplied by the identity collaborator.
///
/// Never persisted by this core. Signature checks happen before one of these
/// exists; only the validity window is re-checked at decision time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPrincipal {
    pub user_id: UserId,
    pub role_ids: Vec<RoleId>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UserPrincipal {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
        validate_window(self.issued_at, self.expires_at, now)
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.validate(now).is_ok()
    }
}

impl From<JwtClaims> for UserPrincipal {
    fn from(claims: JwtClaims) -> Self {
        Self {
            user_id: claims.sub,
            role_ids: claims.roles,
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
        }
    }
}
