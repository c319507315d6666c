//! Error taxonomy for catalog operations.
//!
//! Every rejection path in the catalog returns one of these variants; the
//! API layer maps them onto HTTP status families. Conflict variants always
//! carry the identity of the blocking record so clients can self-resolve.

use thiserror::Error;

use carta_core::Error as CoreError;

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A record failed validation (missing/malformed mandatory field, bad
    /// checksum format, malformed locations, bad query parameters).
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the failure, naming the offending field.
        message: String,
    },

    /// An update attempted to change an immutable field.
    #[error("forbidden field cannot be changed: {field}")]
    ForbiddenField {
        /// The immutable field the update tried to change.
        field: String,
    },

    /// A record with the same logical name already exists under a different
    /// uuid (with a different checksum, or via a concurrent create).
    #[error("conflict with existing file-version {uuid}")]
    FileVersionConflict {
        /// uuid of the record already holding the logical name.
        uuid: String,
    },

    /// A proposed location is already recorded under a different uuid.
    #[error("location {site}:{path} already registered to {uuid}")]
    LocationConflict {
        /// uuid of the record owning the location.
        uuid: String,
        /// Site of the conflicting entry.
        site: String,
        /// Path of the conflicting entry.
        path: String,
    },

    /// A create supplied a uuid that exists with a different checksum.
    #[error("uuid {uuid} exists with a different file-version")]
    UuidConflict {
        /// The colliding uuid.
        uuid: String,
    },

    /// A create targeted a file-version whose locations are all already
    /// recorded.
    #[error("replica already recorded on {uuid}")]
    ReplicaExists {
        /// uuid of the record holding the replica.
        uuid: String,
    },

    /// A conditional update's fingerprint did not match the stored record.
    #[error("record {uuid} was modified since it was read")]
    VersionMismatch {
        /// uuid of the contested record.
        uuid: String,
    },

    /// A named entity (e.g. a collection) already exists.
    #[error("{entity} already exists: {name}")]
    AlreadyExists {
        /// Kind of entity.
        entity: &'static str,
        /// The contested name.
        name: String,
        /// uuid of the existing entity.
        uuid: String,
    },

    /// The operation targeted a uuid that does not exist.
    #[error("no record with uuid {uuid}")]
    NotFound {
        /// The missing uuid.
        uuid: String,
    },

    /// The store returned a state that violates a catalog invariant (e.g.
    /// two records matching a should-be-unique lookup).
    #[error("catalog invariant violated: {message}")]
    InvariantViolation {
        /// Description of the violation.
        message: String,
    },

    /// The store failed or timed out.
    #[error("storage failure: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
        /// Whether retrying the request could succeed.
        retryable: bool,
    },
}

impl CatalogError {
    /// Creates a validation error with the given message.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Returns true for client-caused rejections (4xx-class).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::InvariantViolation { .. } | Self::Storage { .. }
        )
    }
}

impl From<CoreError> for CatalogError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidId { message } | CoreError::InvalidInput(message) => {
                Self::Validation { message }
            }
            CoreError::Timeout { operation } => Self::Storage {
                message: format!("storage operation timed out: {operation}"),
                retryable: true,
            },
            CoreError::Storage { message, .. } => Self::Storage {
                message,
                retryable: true,
            },
            // DuplicateKey reaching here means a writer did not translate it
            // into a conflict; surface the invariant breach rather than hide it.
            CoreError::DuplicateKey { index, value } => Self::InvariantViolation {
                message: format!("untranslated duplicate key on {index}: {value}"),
            },
            CoreError::NotFound(message)
            | CoreError::Serialization { message }
            | CoreError::Internal { message } => Self::InvariantViolation { message },
        }
    }
}
