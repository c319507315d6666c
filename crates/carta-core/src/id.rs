//! Strongly-typed identifiers for Carta entities.
//!
//! Record identity on the wire is a UUID so that importer tooling may supply
//! its own identifiers at creation time; the newtype keeps record UUIDs from
//! being confused with other string identifiers at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a file record in the catalog.
///
/// Server-assigned on creation unless the client supplies one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileUuid(Uuid);

impl FileUuid {
    /// Generates a new random record UUID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a record UUID from a raw [`Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying [`Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for FileUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileUuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s).map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid record uuid '{s}': {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_uuid_roundtrip() {
        let id = FileUuid::generate();
        let s = id.to_string();
        let parsed: FileUuid = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn file_uuids_are_unique() {
        assert_ne!(FileUuid::generate(), FileUuid::generate());
    }

    #[test]
    fn invalid_uuid_returns_error() {
        let result: Result<FileUuid> = "not-a-uuid".parse();
        assert!(matches!(result, Err(Error::InvalidId { .. })));
    }

    #[test]
    fn serde_is_transparent() {
        let id = FileUuid::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
