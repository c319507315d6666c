//! Error types and result aliases shared across Carta.
//!
//! Errors are structured for programmatic handling: the catalog layer maps
//! them onto its own taxonomy, and the API layer maps that onto HTTP status
//! families. Nothing here is stringly-matched downstream.

use std::fmt;

/// The result type used throughout Carta.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core Carta operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested document was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An insert violated a unique index.
    #[error("duplicate key on index {index}: {value}")]
    DuplicateKey {
        /// Name of the violated index.
        index: String,
        /// The offending key value.
        value: String,
    },

    /// A store operation exceeded its time bound.
    ///
    /// Distinct from [`Error::Storage`] so callers can tell a retryable
    /// timeout apart from a hard backend failure.
    #[error("storage operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new not-found error for the given document.
    #[must_use]
    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// Returns true if retrying the operation could succeed.
    ///
    /// Only infrastructure failures are retryable; input and identity
    /// errors never are.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Storage { .. })
    }
}
