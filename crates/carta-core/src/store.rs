//! Document-store abstraction for the catalog.
//!
//! The catalog treats its backing store as a black-box key-document store
//! supporting filtered find/replace/delete and unique indexes. This module
//! defines that contract plus an in-memory backend used by tests and local
//! development.
//!
//! The store assigns each document an internal `_id`; callers address
//! documents by their `uuid` field. Deletes are uuid-exact by construction,
//! so an ambiguous multi-document delete is unrepresentable.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::filter;

/// The internal document id field managed by the store.
pub const INTERNAL_ID_FIELD: &str = "_id";

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// An index the catalog requires from the store.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    /// Index name, used in duplicate-key errors.
    pub name: String,
    /// Dotted field paths covered by the index.
    pub keys: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

impl IndexSpec {
    /// Creates a non-unique index over the given field paths.
    #[must_use]
    pub fn new(name: impl Into<String>, keys: &[&str]) -> Self {
        Self {
            name: name.into(),
            keys: keys.iter().map(|k| (*k).to_string()).collect(),
            unique: false,
        }
    }

    /// Marks the index as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Field selection applied to query results.
#[derive(Debug, Clone, Default)]
pub enum Projection {
    /// Return documents as stored, including the internal id.
    All,
    /// Return exactly the named fields (the internal id only if listed).
    Fields(Vec<String>),
    /// Return everything except the internal id field.
    #[default]
    ExcludeInternal,
}

impl Projection {
    /// Applies the projection to a document.
    #[must_use]
    pub fn apply(&self, doc: &Document) -> Document {
        match self {
            Self::All => doc.clone(),
            Self::ExcludeInternal => {
                let mut out = doc.clone();
                out.remove(INTERNAL_ID_FIELD);
                out
            }
            Self::Fields(fields) => {
                let mut out = Document::new();
                for field in fields {
                    project_path(doc, field, &mut out);
                }
                out
            }
        }
    }
}

/// Copies the value at `path` from `src` into `out`, rebuilding the nested
/// object structure. Arrays are copied whole when addressed by a prefix.
fn project_path(src: &Document, path: &str, out: &mut Document) {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return;
    };

    let Some(mut value) = src.get(first) else {
        return;
    };
    let mut collected = vec![first];
    for seg in segments {
        match value {
            Value::Object(map) => match map.get(seg) {
                Some(child) => {
                    collected.push(seg);
                    value = child;
                }
                None => return,
            },
            // Nested projection inside arrays is not needed by the catalog;
            // copy the array whole.
            _ => break,
        }
    }

    let mut target = out;
    for seg in &collected[..collected.len() - 1] {
        let entry = target
            .entry((*seg).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match entry {
            Value::Object(map) => target = map,
            _ => return,
        }
    }
    if let Some(last) = collected.last() {
        target.insert((*last).to_string(), value.clone());
    }
}

/// The document-store operations the catalog requires.
///
/// Implementations must be safe for request-parallel use; the catalog holds
/// no locks across calls and relies on unique indexes as the authoritative
/// backstop for identity invariants under races.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Returns the first document matching `filter`, if any.
    async fn find_one(&self, filter: &Value) -> Result<Option<Document>>;

    /// Returns documents matching `filter`, in stable store order,
    /// projected and paginated. A `limit` of 0 means no limit.
    async fn find_many(
        &self,
        filter: &Value,
        projection: &Projection,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Document>>;

    /// Inserts a document, assigning its internal id.
    ///
    /// Fails with [`Error::DuplicateKey`] when a unique index is violated.
    async fn insert(&self, doc: Document) -> Result<()>;

    /// Replaces the document whose `uuid` field equals `uuid`.
    ///
    /// The internal id is preserved. Fails with [`Error::NotFound`] if no
    /// such document exists.
    async fn replace(&self, uuid: &str, doc: Document) -> Result<()>;

    /// Deletes the document whose `uuid` field equals `uuid`.
    ///
    /// Fails with [`Error::NotFound`] if no such document exists.
    async fn delete_by_uuid(&self, uuid: &str) -> Result<()>;

    /// Ensures the given indexes exist.
    async fn ensure_indexes(&self, specs: &[IndexSpec]) -> Result<()>;
}

/// Bounds a store operation by `timeout`.
///
/// # Errors
///
/// Returns [`Error::Timeout`] when the deadline elapses; the caller treats
/// that as a retryable storage failure, distinct from validation and
/// conflict outcomes.
pub async fn bounded<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
        }),
    }
}

/// In-memory document store for testing and local development.
///
/// Thread-safe via `RwLock`. Unique-index checks happen inside the write
/// lock, so insert-vs-insert races resolve exactly as a real store's unique
/// constraint would: one winner, one duplicate-key failure.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Documents keyed by internal id; BTreeMap gives stable iteration order.
    docs: BTreeMap<String, Document>,
    indexes: Vec<IndexSpec>,
    next_id: u64,
}

impl MemoryStore {
    /// Creates a new empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new memory store with the given indexes already applied.
    #[must_use]
    pub fn with_indexes(specs: &[IndexSpec]) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.write() {
            inner.indexes = specs.to_vec();
        }
        store
    }

    fn read_inner(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| Error::Internal {
            message: "store lock poisoned".into(),
        })
    }

    fn write_inner(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| Error::Internal {
            message: "store lock poisoned".into(),
        })
    }
}

impl Inner {
    /// Checks unique indexes for a candidate document, ignoring the document
    /// at `skip_id` (used by replace).
    fn check_unique(&self, candidate: &Document, skip_id: Option<&str>) -> Result<()> {
        let candidate_value = Value::Object(candidate.clone());
        for index in self.indexes.iter().filter(|i| i.unique) {
            let Some(keys) = index_key(&candidate_value, &index.keys) else {
                continue;
            };
            for (id, doc) in &self.docs {
                if skip_id == Some(id.as_str()) {
                    continue;
                }
                let existing = Value::Object(doc.clone());
                if index_key(&existing, &index.keys).as_ref() == Some(&keys) {
                    return Err(Error::DuplicateKey {
                        index: index.name.clone(),
                        value: keys.join("|"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Extracts the indexed key tuple from a document, if all parts are present
/// scalars. Documents missing an indexed field are not indexed (sparse).
fn index_key(doc: &Value, keys: &[String]) -> Option<Vec<String>> {
    let mut parts = Vec::with_capacity(keys.len());
    for key in keys {
        let mut current = doc;
        for seg in key.split('.') {
            current = current.as_object()?.get(seg)?;
        }
        match current {
            Value::String(s) => parts.push(s.clone()),
            Value::Number(n) => parts.push(n.to_string()),
            _ => return None,
        }
    }
    Some(parts)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one(&self, filter: &Value) -> Result<Option<Document>> {
        let inner = self.read_inner()?;
        for doc in inner.docs.values() {
            if filter::matches(&Value::Object(doc.clone()), filter)? {
                return Ok(Some(doc.clone()));
            }
        }
        Ok(None)
    }

    async fn find_many(
        &self,
        filter: &Value,
        projection: &Projection,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Document>> {
        let inner = self.read_inner()?;
        let mut out = Vec::new();
        let mut seen = 0u64;
        for doc in inner.docs.values() {
            if !filter::matches(&Value::Object(doc.clone()), filter)? {
                continue;
            }
            seen += 1;
            if seen <= skip {
                continue;
            }
            out.push(projection.apply(doc));
            if limit > 0 && out.len() as u64 >= limit {
                break;
            }
        }
        Ok(out)
    }

    async fn insert(&self, mut doc: Document) -> Result<()> {
        let mut inner = self.write_inner()?;
        inner.check_unique(&doc, None)?;
        let id = format!("{:024x}", inner.next_id);
        inner.next_id += 1;
        doc.insert(INTERNAL_ID_FIELD.to_string(), Value::String(id.clone()));
        inner.docs.insert(id, doc);
        Ok(())
    }

    async fn replace(&self, uuid: &str, mut doc: Document) -> Result<()> {
        let mut inner = self.write_inner()?;
        let id = inner
            .docs
            .iter()
            .find(|(_, d)| d.get("uuid").and_then(Value::as_str) == Some(uuid))
            .map(|(id, _)| id.clone())
            .ok_or_else(|| Error::not_found(format!("document with uuid {uuid}")))?;
        inner.check_unique(&doc, Some(id.as_str()))?;
        doc.insert(INTERNAL_ID_FIELD.to_string(), Value::String(id.clone()));
        inner.docs.insert(id, doc);
        Ok(())
    }

    async fn delete_by_uuid(&self, uuid: &str) -> Result<()> {
        let mut inner = self.write_inner()?;
        let ids: Vec<String> = inner
            .docs
            .iter()
            .filter(|(_, d)| d.get("uuid").and_then(Value::as_str) == Some(uuid))
            .map(|(id, _)| id.clone())
            .collect();
        match ids.as_slice() {
            [] => Err(Error::not_found(format!("document with uuid {uuid}"))),
            [id] => {
                inner.docs.remove(id);
                Ok(())
            }
            _ => Err(Error::Internal {
                message: format!("uuid {uuid} matches multiple documents"),
            }),
        }
    }

    async fn ensure_indexes(&self, specs: &[IndexSpec]) -> Result<()> {
        let mut inner = self.write_inner()?;
        inner.indexes = specs.to_vec();
        Ok(())
    }
}
