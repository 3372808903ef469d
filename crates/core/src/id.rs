//! Strongly-typed identifiers used across the authorization core.
//!
//! All identifiers are UUIDv7, so ordering by id is ordering by creation time.
//! The registry relies on that to pick the oldest of two rules claiming the
//! same route.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// A fresh, time-ordered identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s.trim())
                    .map(Self)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {e}", stringify!($name))))
            }
        }
    };
}

uuid_id!(
    /// Identifier of an endpoint rule.
    RuleId
);
uuid_id!(
    /// Identifier of a permission-key catalog row.
    PermissionKeyId
);
uuid_id!(
    /// Identifier of a role.
    RoleId
);
uuid_id!(
    /// Identifier of a user (supplied by the identity collaborator).
    UserId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reports_type_name() {
        let err = "nope".parse::<RoleId>().unwrap_err();
        let DomainError::InvalidId(msg) = err else {
            panic!("expected InvalidId");
        };
        assert!(msg.starts_with("RoleId"));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        let id = RuleId::new();
        let parsed: RuleId = format!(" {id} ").parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn later_ids_sort_after_earlier_ones() {
        let first = RuleId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = RuleId::new();
        assert!(first < second);
    }
}
