//! Collections: named groups of files defined by a stored query.
//!
//! A collection stores a canonical filter document plus an owner and name;
//! its member files are resolved by running that stored query through the
//! regular find path. Collections are plain CRUD over their own store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use carta_core::FileUuid;
use carta_core::store::{DocumentStore, Projection, bounded};

use crate::collection_indexes;
use crate::error::{CatalogError, Result};
use crate::query::{CanonicalQuery, QueryLimits, build_find_query};
use crate::record::MODIFY_DATE_FORMAT;

/// Default bound on each store call.
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// A stored collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    /// Collection identity, server-assigned.
    pub uuid: FileUuid,
    /// Collection name, unique catalog-wide.
    pub collection_name: String,
    /// Owner identifier (the creating subject).
    pub owner: String,
    /// The stored canonical filter selecting member files.
    #[serde(default)]
    pub query: Value,
    /// Server-stamped creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
}

impl Collection {
    /// Builds the member-file query: the stored filter as the base, with
    /// pagination and projection parameters from the request applied on top.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Validation`] for malformed pagination parameters.
    pub fn member_query(
        &self,
        params: &HashMap<String, String>,
        limits: &QueryLimits,
    ) -> Result<CanonicalQuery> {
        let mut params = params.clone();
        let stored = serde_json::to_string(&self.query).map_err(|e| {
            CatalogError::InvariantViolation {
                message: format!("stored collection query does not serialize: {e}"),
            }
        })?;
        params.insert("query".to_string(), stored);
        build_find_query(&params, limits)
    }
}

/// CRUD over the collection store.
pub struct Collections {
    store: Arc<dyn DocumentStore>,
    op_timeout: Duration,
}

impl std::fmt::Debug for Collections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collections")
            .field("store", &"<DocumentStore>")
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl Collections {
    /// Creates a collection handle over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Overrides the per-store-call time bound.
    #[must_use]
    pub const fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Ensures collection indexes exist. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a storage error if index creation fails.
    pub async fn initialize(&self) -> Result<()> {
        bounded(
            "ensure collection indexes",
            self.op_timeout,
            self.store.ensure_indexes(&collection_indexes()),
        )
        .await?;
        Ok(())
    }

    /// Creates a collection; the name must be free.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Validation`] for an empty name or a query using
    /// unsupported operators; [`CatalogError::AlreadyExists`] when the name
    /// is taken, carrying the holder's uuid.
    pub async fn create(&self, name: &str, owner: &str, query: Value) -> Result<FileUuid> {
        if name.is_empty() {
            return Err(CatalogError::validation(
                "collection_name must not be empty",
            ));
        }
        if !query.is_object() {
            return Err(CatalogError::validation("query must be a JSON object"));
        }

        if let Some(existing) = self.find_by_name(name).await? {
            return Err(CatalogError::AlreadyExists {
                entity: "collection",
                name: name.to_string(),
                uuid: existing.uuid.to_string(),
            });
        }

        let collection = Collection {
            uuid: FileUuid::generate(),
            collection_name: name.to_string(),
            owner: owner.to_string(),
            query,
            creation_date: Some(Utc::now().format(MODIFY_DATE_FORMAT).to_string()),
        };
        let uuid = collection.uuid;

        let doc = to_document(&collection)?;
        match bounded("insert collection", self.op_timeout, self.store.insert(doc)).await {
            Ok(()) => {
                tracing::debug!(uuid = %uuid, name = %name, "collection created");
                Ok(uuid)
            }
            Err(carta_core::Error::DuplicateKey { .. }) => {
                let holder = self.find_by_name(name).await?;
                Err(CatalogError::AlreadyExists {
                    entity: "collection",
                    name: name.to_string(),
                    uuid: holder.map_or_else(|| "unknown".to_string(), |c| c.uuid.to_string()),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetches a collection by uuid.
    ///
    /// # Errors
    ///
    /// Returns a storage error on store failure or timeout.
    pub async fn get(&self, uuid: &FileUuid) -> Result<Option<Collection>> {
        let found = bounded(
            "find collection by uuid",
            self.op_timeout,
            self.store.find_one(&json!({"uuid": uuid.to_string()})),
        )
        .await?;
        found.map(|doc| from_document(&doc)).transpose()
    }

    /// Lists collections in store order.
    ///
    /// # Errors
    ///
    /// Returns a storage error on store failure or timeout.
    pub async fn list(&self, skip: u64, limit: u64) -> Result<Vec<Collection>> {
        let docs = bounded(
            "list collections",
            self.op_timeout,
            self.store
                .find_many(&json!({}), &Projection::ExcludeInternal, skip, limit),
        )
        .await?;
        docs.iter().map(from_document).collect()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Collection>> {
        let found = bounded(
            "find collection by name",
            self.op_timeout,
            self.store.find_one(&json!({"collection_name": name})),
        )
        .await?;
        found.map(|doc| from_document(&doc)).transpose()
    }
}

fn to_document(collection: &Collection) -> Result<Map<String, Value>> {
    match serde_json::to_value(collection) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) | Err(_) => Err(CatalogError::InvariantViolation {
            message: "collection did not serialize to an object".to_string(),
        }),
    }
}

fn from_document(doc: &Map<String, Value>) -> Result<Collection> {
    let mut doc = doc.clone();
    doc.remove(carta_core::store::INTERNAL_ID_FIELD);
    serde_json::from_value(Value::Object(doc)).map_err(|e| CatalogError::InvariantViolation {
        message: format!("stored collection is malformed: {e}"),
    })
}
