//! Error-code/message table for denials.
//!
//! Built once at startup and shared read-only (`Arc<ErrorCatalog>`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::authorize::{DenyCause, DenyKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: String,
    pub message: String,
}

impl ErrorEntry {
    fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// A rendered denial, ready for a transport to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    pub kind: DenyKind,
    pub cause: DenyCause,
    pub code: String,
    pub message: String,
}

impl Denial {
    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }
}

#[derive(Debug, Clone)]
pub struct ErrorCatalog {
    entries: HashMap<DenyCause, ErrorEntry>,
}

impl Default for ErrorCatalog {
    fn default() -> Self {
        let entries = DenyCause::ALL
            .into_iter()
            .map(|cause| (cause, default_entry(cause)))
            .collect();
        Self { entries }
    }
}

impl ErrorCatalog {
    /// Defaults with selected entries replaced.
    pub fn with_overrides(overrides: impl IntoIterator<Item = (DenyCause, ErrorEntry)>) -> Self {
        let mut catalog = Self::default();
        catalog.entries.extend(overrides);
        catalog
    }

    /// Parse overrides from a JSON object keyed by cause, e.g.
    /// `{"missing_permission": {"code": "E403", "message": "nope"}}`.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let overrides: HashMap<DenyCause, ErrorEntry> = serde_json::from_str(raw)?;
        Ok(Self::with_overrides(overrides))
    }

    pub fn entry(&self, cause: DenyCause) -> ErrorEntry {
        self.entries
            .get(&cause)
            .cloned()
            .unwrap_or_else(|| default_entry(cause))
    }

    pub fn deny(&self, cause: DenyCause) -> Denial {
        let ErrorEntry { code, message } = self.entry(cause);
        Denial {
            kind: cause.kind(),
            cause,
            code,
            message,
        }
    }
}

fn default_entry(cause: DenyCause) -> ErrorEntry {
    match cause {
        DenyCause::MissingPrincipal => ErrorEntry::new("unauthorized", "authentication required"),
        DenyCause::InvalidPrincipal => {
            ErrorEntry::new("unauthorized", "credentials are invalid or expired")
        }
        DenyCause::RuleNotFound => {
            ErrorEntry::new("rule_not_found", "no access rule is registered for this endpoint")
        }
        DenyCause::MissingPermission => ErrorEntry::new("forbidden", "insufficient permissions"),
        DenyCause::OverrideNotBound => ErrorEntry::new(
            "forbidden",
            "the requested permission is not declared for this endpoint",
        ),
        DenyCause::StoreUnavailable => {
            ErrorEntry::new("internal_error", "authorization is temporarily unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_cause() {
        let catalog = ErrorCatalog::default();
        for cause in DenyCause::ALL {
            let denial = catalog.deny(cause);
            assert!(!denial.code.is_empty());
            assert_eq!(denial.kind, cause.kind());
        }
        assert_eq!(catalog.deny(DenyCause::StoreUnavailable).status_code(), 500);
    }

    #[test]
    fn json_overrides_replace_single_entries() {
        let catalog = ErrorCatalog::from_json(
            r#"{"missing_permission": {"code": "E403", "message": "not allowed"}}"#,
        )
        .unwrap();
        assert_eq!(catalog.deny(DenyCause::MissingPermission).code, "E403");
        assert_eq!(catalog.deny(DenyCause::MissingPrincipal).code, "unauthorized");
        assert!(ErrorCatalog::from_json(r#"{"bogus": {"code": "x", "message": "y"}}"#).is_err());
    }
}
