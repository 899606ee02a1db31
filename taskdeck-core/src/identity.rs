//! Identity types for taskdeck entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Server-assigned ids are opaque strings. Each entity type gets its own
/// newtype so a user id can never be passed where a task id is expected.
macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(
    /// Server-assigned task identifier.
    TaskId
);
opaque_id!(
    /// Server-assigned user identifier.
    UserId
);
opaque_id!(
    /// Server-assigned project identifier.
    ProjectId
);

/// Client-generated identifier for a task that only exists speculatively.
///
/// Backed by a UUIDv7. `Uuid::now_v7` is monotonic within a process, so two
/// temp ids generated in the same millisecond still differ and an id is never
/// handed out twice during the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(Uuid);

impl TempId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temp_{}", self.0)
    }
}

/// Identifier of one submitted request. Ledger entries remember the request
/// that wrote them so a finished request only ever retires its own entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn temp_ids_are_unique_under_rapid_generation() {
        let ids: HashSet<TempId> = (0..10_000).map(|_| TempId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn temp_ids_are_monotonic() {
        let first = TempId::generate();
        let second = TempId::generate();
        assert!(second > first);
    }

    #[test]
    fn temp_id_display_is_prefixed() {
        let id = TempId::generate();
        assert!(id.to_string().starts_with("temp_"));
    }

    #[test]
    fn opaque_ids_serialize_as_plain_strings() {
        let id = TaskId::new("42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");
        let parsed: UserId = serde_json::from_str("\"u-7\"").unwrap();
        assert_eq!(parsed.as_str(), "u-7");
    }
}
