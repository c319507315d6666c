//! Catalog read operations.
//!
//! The reader resolves uuid lookups and canonical queries against the store;
//! it applies no policy beyond the internal-id projection.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use carta_core::FileUuid;
use carta_core::store::{Document, DocumentStore, Projection, bounded};

use crate::error::Result;
use crate::query::CanonicalQuery;

/// Default bound on each store call.
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Reader for file records.
pub struct CatalogReader {
    store: Arc<dyn DocumentStore>,
    op_timeout: Duration,
}

impl std::fmt::Debug for CatalogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogReader")
            .field("store", &"<DocumentStore>")
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl CatalogReader {
    /// Creates a reader over the given store.
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

    /// Fetches a record by uuid, without the store's internal id.
    ///
    /// The returned document still carries `meta_fingerprint`, which the API
    /// layer serves as the `ETag`.
    ///
    /// # Errors
    ///
    /// Returns a storage error on store failure or timeout.
    pub async fn get(&self, uuid: &FileUuid) -> Result<Option<Document>> {
        let found = bounded(
            "find record by uuid",
            self.op_timeout,
            self.store.find_one(&json!({"uuid": uuid.to_string()})),
        )
        .await?;
        Ok(found.map(|doc| Projection::ExcludeInternal.apply(&doc)))
    }

    /// Runs a canonical query.
    ///
    /// Result order is whatever the store yields; stable pagination across
    /// concurrent writes is not guaranteed.
    ///
    /// # Errors
    ///
    /// Returns a storage error on store failure or timeout.
    pub async fn find(&self, query: &CanonicalQuery) -> Result<Vec<Document>> {
        Ok(bounded(
            "find records",
            self.op_timeout,
            self.store
                .find_many(&query.filter, &query.projection, query.skip, query.limit),
        )
        .await?)
    }
}
