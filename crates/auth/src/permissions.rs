use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use gatehouse_core::{DomainError, DomainResult, Entity, PermissionKeyId, Retirable};

/// Longest permission key accepted at the admin boundary.
pub const MAX_KEY_LEN: usize = 128;

/// Permission key identifier.
///
/// Keys are opaque strings (e.g. "News.Create"). Grants are exact-key
/// membership: there is no wildcard and no hierarchy expansion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionKey(Cow<'static, str>);

impl PermissionKey {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Build a key from admin input, rejecting malformed values.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("permission key must not be empty"));
        }
        if trimmed.len() > MAX_KEY_LEN {
            return Err(DomainError::validation(format!(
                "permission key exceeds {MAX_KEY_LEN} characters"
            )));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "permission key '{trimmed}' must not contain whitespace"
            )));
        }
        Ok(Self(Cow::Owned(trimmed.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A permission-key catalog row as stored by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionKeyRow {
    pub id: PermissionKeyId,
    pub key: PermissionKey,
    pub display_name: String,
    pub parent_id: Option<PermissionKeyId>,
    /// Explicit ordering among siblings (unique per parent among active rows).
    pub sort_order: i32,
    pub retired: bool,
}

impl Entity for PermissionKeyRow {
    type Id = PermissionKeyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Retirable for PermissionKeyRow {
    fn is_retired(&self) -> bool {
        self.retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_and_accepts_dotted_keys() {
        let key = PermissionKey::parse("  News.Create ").unwrap();
        assert_eq!(key.as_str(), "News.Create");
    }

    #[test]
    fn parse_rejects_empty_long_and_spaced_keys() {
        assert!(PermissionKey::parse("   ").is_err());
        assert!(PermissionKey::parse("News Create").is_err());
        assert!(PermissionKey::parse(&"a".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(PermissionKey::parse(&"a".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn keys_are_case_sensitive() {
        assert_ne!(PermissionKey::new("news.create"), PermissionKey::new("News.Create"));
    }
}
