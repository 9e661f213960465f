//! Strongly-typed ID types for domain entities.
//!
//! Every persisted entity is keyed by a ULID, so identifiers sort by creation
//! time. The display form carries a short type prefix (`wf_01H...`) which is
//! also accepted when parsing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Generates a ULID-backed identifier newtype with a display prefix.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a randomly generated ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Creates an ID from a ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the prefix used for display formatting.
            #[must_use]
            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ulid::from_str(raw).map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    reason: e.to_string(),
                })
            }
        }

        impl From<Ulid> for $name {
            fn from(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a tenant organization.
    OrganizationId,
    "org"
);

define_id!(
    /// Unique identifier for a workflow definition.
    WorkflowId,
    "wf"
);

define_id!(
    /// Unique identifier for one execution (run) of a workflow.
    WorkflowExecutionId,
    "wfx"
);

define_id!(
    /// Unique identifier for an entry in a workflow's audit log.
    AuditEntryId,
    "aud"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_type_prefix() {
        assert!(OrganizationId::new().to_string().starts_with("org_"));
        assert!(WorkflowId::new().to_string().starts_with("wf_"));
        assert!(WorkflowExecutionId::new().to_string().starts_with("wfx_"));
        assert!(AuditEntryId::new().to_string().starts_with("aud_"));
    }

    #[test]
    fn parses_prefixed_and_raw_forms() {
        let id = WorkflowExecutionId::new();
        let prefixed: WorkflowExecutionId = id.to_string().parse().expect("prefixed");
        let raw: WorkflowExecutionId = id.as_ulid().to_string().parse().expect("raw");
        assert_eq!(prefixed, id);
        assert_eq!(raw, id);
    }

    #[test]
    fn rejects_foreign_prefix() {
        let wf = WorkflowId::new().to_string();
        let err = wf.parse::<OrganizationId>().unwrap_err();
        assert_eq!(err.id_type, "OrganizationId");
    }

    #[test]
    fn ids_order_by_creation() {
        let first = WorkflowExecutionId::from_ulid(Ulid::from_parts(1_000, 1));
        let second = WorkflowExecutionId::from_ulid(Ulid::from_parts(2_000, 1));
        assert!(first < second);
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let id = WorkflowId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));
    }
}
