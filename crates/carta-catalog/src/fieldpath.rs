//! Dotted field-path resolution over record documents.
//!
//! Validation and forbidden-field checks address fields like
//! `checksum.sha512` by dotted path. Resolution distinguishes a path whose
//! segment is absent from one that runs into a non-object value; both are
//! non-fatal, but callers sometimes need to know which happened.

use serde_json::Value;

/// Outcome of resolving a dotted path against a document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<'a> {
    /// The full path resolved to a value.
    Found(&'a Value),
    /// Some segment was absent.
    Missing,
    /// An intermediate segment's value is not an object, so descent is
    /// impossible (e.g. descending into a string or a list).
    NotTraversable,
}

impl<'a> Resolution<'a> {
    /// Returns the resolved value, treating both failure modes as absent.
    #[must_use]
    pub const fn value(&self) -> Option<&'a Value> {
        match self {
            Self::Found(v) => Some(v),
            Self::Missing | Self::NotTraversable => None,
        }
    }

    /// Returns true when the path resolved.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Resolves `path` (e.g. `"checksum.sha512"`) against `doc`, descending into
/// nested objects on each `.`-separated segment.
#[must_use]
pub fn resolve<'a>(doc: &'a Value, path: &str) -> Resolution<'a> {
    let mut current = doc;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(child) => current = child,
                None => return Resolution::Missing,
            },
            _ => return Resolution::NotTraversable,
        }
    }
    Resolution::Found(current)
}
