//! The catalog's core entity: a file record.
//!
//! A record couples a small set of invariant-checked, strongly typed fields
//! (uuid, logical name, checksum, size, locations) with an open-ended bag of
//! domain attributes that the catalog stores but does not interpret. The
//! mutation protocol works on raw documents so that shape problems surface
//! as named validation errors rather than deserialization failures; a
//! document is parsed into [`FileRecord`] only after it validates.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use carta_core::canonical::canonical_digest;
use carta_core::store::INTERNAL_ID_FIELD;
use carta_core::FileUuid;

use crate::error::{CatalogError, Result};

/// Timestamp format for `meta_modify_date` (UTC, microsecond precision).
pub const MODIFY_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Field holding the stored optimistic-concurrency fingerprint.
pub const FINGERPRINT_FIELD: &str = "meta_fingerprint";

/// Field holding the server-stamped modification timestamp.
pub const MODIFY_DATE_FIELD: &str = "meta_modify_date";

/// Hex length of the stored fingerprint (SHA-512 truncated).
const FINGERPRINT_LEN: usize = 32;

/// One physical copy of a file's bytes.
///
/// Identity for conflict purposes is the `(site, path)` pair; the archive
/// flag is carried but does not distinguish replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Storage site name.
    pub site: String,
    /// Path of the copy at that site.
    pub path: String,
    /// Whether this copy lives in archival storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<bool>,
}

impl Location {
    /// Returns true when `other` refers to the same physical copy.
    #[must_use]
    pub fn same_replica(&self, other: &Self) -> bool {
        self.site == other.site && self.path == other.path
    }
}

/// Content checksums for a record. `sha512` is mandatory; other digest
/// algorithms ride along in the extension bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checksum {
    /// SHA-512 digest, 128 hex characters.
    pub sha512: String,
    /// Additional digests (md5, crc32, ...), uninterpreted.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A catalog record describing one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Record identity; server-assigned on creation unless client-supplied.
    pub uuid: FileUuid,
    /// The file's canonical name, unique catalog-wide.
    pub logical_name: String,
    /// Content checksums.
    pub checksum: Checksum,
    /// File size in bytes.
    pub file_size: u64,
    /// Physical copies; non-empty, unique by `(site, path)`.
    pub locations: Vec<Location>,
    /// Server-stamped modification timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_modify_date: Option<String>,
    /// Stored optimistic-concurrency fingerprint, served as the `ETag`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_fingerprint: Option<String>,
    /// Opaque domain attributes (run numbers, dataset ids, nested
    /// processing metadata, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileRecord {
    /// Parses a validated document into a typed record.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Validation`] when a typed field has the wrong
    /// shape. Run the validator first so failures carry field names.
    pub fn from_document(doc: &Value) -> Result<Self> {
        let mut doc = doc.clone();
        if let Value::Object(map) = &mut doc {
            map.remove(INTERNAL_ID_FIELD);
        }
        serde_json::from_value(doc).map_err(|e| CatalogError::Validation {
            message: format!("malformed record: {e}"),
        })
    }

    /// Serializes the record back into a document.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvariantViolation`] if serialization fails,
    /// which cannot happen for a record that deserialized.
    pub fn to_document(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| CatalogError::InvariantViolation {
            message: format!("record serialization failed: {e}"),
        })
    }

    /// Stamps the modification timestamp with the current time.
    pub fn stamp(&mut self) {
        self.meta_modify_date = Some(Utc::now().format(MODIFY_DATE_FORMAT).to_string());
    }
}

/// Computes the record fingerprint: a truncated SHA-512 of the canonical
/// JSON form, excluding the store's internal id and any prior fingerprint.
///
/// Computed once at write time, stored in the document, and compared
/// directly on conditional updates — every code path shares this one basis.
///
/// # Errors
///
/// Returns [`CatalogError::InvariantViolation`] if canonicalization fails.
pub fn fingerprint_of(doc: &Value) -> Result<String> {
    let mut doc = doc.clone();
    if let Value::Object(map) = &mut doc {
        map.remove(INTERNAL_ID_FIELD);
        map.remove(FINGERPRINT_FIELD);
    }
    canonical_digest(&doc, FINGERPRINT_LEN).map_err(|e| CatalogError::InvariantViolation {
        message: format!("fingerprint computation failed: {e}"),
    })
}
