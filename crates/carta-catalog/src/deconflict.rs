//! Deconfliction: detecting identity and location collisions before a write
//! is accepted.
//!
//! These checks are optimistic — the store's unique indexes remain the
//! authoritative backstop under races — but they let the catalog reject
//! conflicting writes with a reference to the blocking record instead of an
//! opaque duplicate-key failure.
//!
//! Lookups are exact-match on indexed fields. If a should-be-unique lookup
//! returns more than one record, something bypassed the API and violated a
//! store invariant; that is surfaced as [`CatalogError::InvariantViolation`]
//! rather than silently resolved.

use std::time::Duration;

use serde_json::{Value, json};

use carta_core::store::{Document, DocumentStore, Projection, bounded};

use crate::error::{CatalogError, Result};
use crate::record::Location;

/// Checks whether a `(logical_name, sha512)` file-version already exists
/// under a uuid other than `ignore_uuid`.
///
/// # Errors
///
/// [`CatalogError::FileVersionConflict`] carrying the existing record's
/// uuid; [`CatalogError::InvariantViolation`] on ambiguous matches;
/// [`CatalogError::Storage`] on store failure or timeout.
pub async fn check_file_version(
    store: &dyn DocumentStore,
    logical_name: &str,
    sha512: &str,
    ignore_uuid: Option<&str>,
    timeout: Duration,
) -> Result<()> {
    let filter = json!({
        "logical_name": logical_name,
        "checksum.sha512": sha512,
    });
    match unique_match(store, &filter, ignore_uuid, timeout).await? {
        Some(doc) => Err(CatalogError::FileVersionConflict {
            uuid: doc_uuid(&doc)?.to_string(),
        }),
        None => Ok(()),
    }
}

/// Checks each proposed location against the catalog, stopping at the first
/// entry recorded under a uuid other than `ignore_uuid`.
///
/// # Errors
///
/// [`CatalogError::LocationConflict`] for the first conflicting entry;
/// [`CatalogError::Storage`] on store failure or timeout.
pub async fn check_locations(
    store: &dyn DocumentStore,
    locations: &[Location],
    ignore_uuid: Option<&str>,
    timeout: Duration,
) -> Result<()> {
    for location in locations {
        let filter = json!({
            "locations": {"$elemMatch": {"site": location.site, "path": location.path}},
        });
        if let Some(doc) = unique_match(store, &filter, ignore_uuid, timeout).await? {
            return Err(CatalogError::LocationConflict {
                uuid: doc_uuid(&doc)?.to_string(),
                site: location.site.clone(),
                path: location.path.clone(),
            });
        }
    }
    Ok(())
}

/// Returns the record currently owning `logical_name`, if any.
///
/// The create path uses this to tell "same file-version, candidate replica"
/// apart from "different checksum, hard conflict".
///
/// # Errors
///
/// [`CatalogError::InvariantViolation`] when more than one record holds the
/// name; [`CatalogError::Storage`] on store failure or timeout.
pub async fn logical_name_owner(
    store: &dyn DocumentStore,
    logical_name: &str,
    timeout: Duration,
) -> Result<Option<Document>> {
    unique_match(store, &json!({"logical_name": logical_name}), None, timeout).await
}

/// Runs a lookup that the catalog's invariants guarantee matches at most one
/// record besides `ignore_uuid`, and enforces that guarantee.
async fn unique_match(
    store: &dyn DocumentStore,
    filter: &Value,
    ignore_uuid: Option<&str>,
    timeout: Duration,
) -> Result<Option<Document>> {
    // Fetch one more than we can tolerate so ambiguity is observable.
    let matches = bounded(
        "deconfliction lookup",
        timeout,
        store.find_many(filter, &Projection::All, 0, 3),
    )
    .await?;

    let mut others = matches
        .into_iter()
        .filter(|doc| match (ignore_uuid, doc.get("uuid").and_then(Value::as_str)) {
            (Some(ignore), Some(uuid)) => uuid != ignore,
            _ => true,
        })
        .collect::<Vec<_>>();

    if others.len() > 1 {
        return Err(CatalogError::InvariantViolation {
            message: format!("multiple records match unique lookup {filter}"),
        });
    }
    Ok(others.pop())
}

fn doc_uuid(doc: &Document) -> Result<&str> {
    doc.get("uuid")
        .and_then(Value::as_str)
        .ok_or_else(|| CatalogError::InvariantViolation {
            message: "stored record has no uuid".to_string(),
        })
}
