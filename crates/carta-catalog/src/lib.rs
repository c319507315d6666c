//! # carta-catalog
//!
//! Catalog domain logic for Carta, the file-metadata catalog.
//!
//! This crate implements the policy layer between the HTTP API and the
//! document store:
//!
//! - **Validation**: mandatory fields, forbidden fields, checksum and
//!   location shape ([`validate`])
//! - **Deconfliction**: file-version and location collision detection
//!   ([`deconflict`])
//! - **Query shaping**: ad-hoc query parameters normalized into one
//!   canonical filter document with bounded pagination ([`query`])
//! - **Mutation protocol**: create / replace / patch / delete with replica
//!   merge and fingerprint-based optimistic concurrency ([`writer`])
//! - **Collections**: named groups of files defined by a stored query
//!   ([`collection`])
//!
//! The store itself is abstract (`carta_core::store::DocumentStore`); every
//! invariant is enforced by optimistic pre-checks here plus the store's
//! unique indexes as the authoritative backstop under races.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod collection;
pub mod deconflict;
pub mod error;
pub mod fieldpath;
pub mod query;
pub mod reader;
pub mod record;
pub mod validate;
pub mod writer;

pub use error::{CatalogError, Result};
pub use reader::CatalogReader;
pub use record::{Checksum, FileRecord, Location};
pub use writer::{CatalogWriter, CreateOutcome};

use carta_core::store::IndexSpec;

/// Indexes the file store must provide for correctness and performance.
///
/// The unique indexes on `uuid` and `logical_name` are the authoritative
/// backstop for identity invariants when concurrent creates race past the
/// optimistic pre-checks.
#[must_use]
pub fn file_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::new("uuid", &["uuid"]).unique(),
        IndexSpec::new("logical_name", &["logical_name"]).unique(),
        IndexSpec::new("locations", &["locations.site", "locations.path"]),
        IndexSpec::new("locations_archive", &["locations.archive"]),
    ]
}

/// Indexes the collection store must provide.
#[must_use]
pub fn collection_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::new("uuid", &["uuid"]).unique(),
        IndexSpec::new("collection_name", &["collection_name"]).unique(),
    ]
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::collection::{Collection, Collections};
    pub use crate::error::{CatalogError, Result};
    pub use crate::query::{CanonicalQuery, QueryLimits, build_find_query};
    pub use crate::reader::CatalogReader;
    pub use crate::record::{Checksum, FileRecord, Location};
    pub use crate::writer::{CatalogWriter, CreateOutcome};
}
