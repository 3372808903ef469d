use serde::{Deserialize, Serialize};

use gatehouse_core::{Entity, Retirable, RoleId};

use crate::PermissionKey;

/// Role status. Inactive roles contribute no grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoleStatus {
    #[default]
    Active,
    Inactive,
}

impl core::fmt::Display for RoleStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RoleStatus::Active => write!(f, "active"),
            RoleStatus::Inactive => write!(f, "inactive"),
        }
    }
}

impl core::str::FromStr for RoleStatus {
    type Err = gatehouse_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(gatehouse_core::DomainError::validation(format!(
                "unknown role status '{other}'"
            ))),
        }
    }
}

/// A role row as stored by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRow {
    pub id: RoleId,
    pub name: String,
    pub status: RoleStatus,
    pub retired: bool,
}

impl RoleRow {
    /// Whether the role may contribute grants to a principal.
    pub fn is_effective(&self) -> bool {
        !self.retired && self.status == RoleStatus::Active
    }
}

impl Entity for RoleRow {
    type Id = RoleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Retirable for RoleRow {
    fn is_retired(&self) -> bool {
        self.retired
    }
}

/// One permission key granted to one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrantRow {
    pub role_id: RoleId,
    pub permission_key: PermissionKey,
    pub retired: bool,
}

impl Retirable for RoleGrantRow {
    fn is_retired(&self) -> bool {
        self.retired
    }
}
