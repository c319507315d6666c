//! Catalog write operations: the record mutation protocol.
//!
//! One writer instance handles create / replace / patch / delete for file
//! records. The protocol is a sequence of store calls with no store-level
//! lock held across them; identity invariants are protected by optimistic
//! pre-checks here plus the store's unique indexes as the final backstop. A
//! duplicate-key failure in the create race window is translated into a
//! conflict naming the winning record, never surfaced as an internal error.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use carta_core::Error as CoreError;
use carta_core::FileUuid;
use carta_core::store::{Document, DocumentStore, bounded};

use crate::deconflict;
use crate::error::{CatalogError, Result};
use crate::file_indexes;
use crate::record::{FINGERPRINT_FIELD, FileRecord, Location, fingerprint_of};
use crate::validate;

/// Default bound on each store call.
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new record was inserted.
    Created {
        /// uuid of the new record.
        uuid: FileUuid,
    },
    /// The file-version already existed; new locations were appended to it.
    ///
    /// This is an update of the existing record, not a creation.
    Merged {
        /// uuid of the record that absorbed the new locations.
        uuid: FileUuid,
    },
}

impl CreateOutcome {
    /// Returns the uuid of the affected record.
    #[must_use]
    pub const fn uuid(&self) -> &FileUuid {
        match self {
            Self::Created { uuid } | Self::Merged { uuid } => uuid,
        }
    }
}

/// Writer for file records.
pub struct CatalogWriter {
    store: Arc<dyn DocumentStore>,
    op_timeout: Duration,
}

impl std::fmt::Debug for CatalogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogWriter")
            .field("store", &"<DocumentStore>")
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl CatalogWriter {
    /// Creates a writer over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Overrides the per-store-call time bound (propagated from the inbound
    /// request's overall timeout).
    #[must_use]
    pub const fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Ensures the indexes the protocol relies on exist. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a storage error if index creation fails.
    pub async fn initialize(&self) -> Result<()> {
        bounded(
            "ensure file indexes",
            self.op_timeout,
            self.store.ensure_indexes(&file_indexes()),
        )
        .await?;
        Ok(())
    }

    /// Creates a record, or merges new replica locations into the record
    /// already holding the same file-version.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::Validation`] / [`CatalogError::ForbiddenField`] for
    ///   malformed candidates;
    /// - [`CatalogError::UuidConflict`] when the supplied uuid exists with a
    ///   different checksum;
    /// - [`CatalogError::ReplicaExists`] when every supplied location is
    ///   already recorded for the file-version;
    /// - [`CatalogError::FileVersionConflict`] /
    ///   [`CatalogError::LocationConflict`] when another record is in the
    ///   way, carrying its uuid;
    /// - [`CatalogError::Storage`] on store failure or timeout.
    pub async fn create(&self, candidate: Value) -> Result<CreateOutcome> {
        let Value::Object(mut doc) = candidate else {
            return Err(CatalogError::validation("record must be a JSON object"));
        };

        let uuid = match doc.get("uuid") {
            None => {
                let uuid = FileUuid::generate();
                doc.insert("uuid".to_string(), Value::String(uuid.to_string()));
                uuid
            }
            Some(Value::String(s)) => s
                .parse::<FileUuid>()
                .map_err(|e| CatalogError::validation(e.to_string()))?,
            Some(_) => return Err(CatalogError::validation("uuid must be a string")),
        };

        let candidate = Value::Object(doc);
        validate::validate_creation(&candidate)?;
        let record = FileRecord::from_document(&candidate)?;

        // A client-supplied uuid may target an existing record.
        if let Some(existing) = self.fetch(&uuid).await? {
            let existing = FileRecord::from_document(&Value::Object(existing))?;
            if existing.checksum.sha512 != record.checksum.sha512 {
                return Err(CatalogError::UuidConflict {
                    uuid: uuid.to_string(),
                });
            }
            return self.merge_replicas(existing, &record.locations).await;
        }

        // Deconflict against the whole catalog, not just this uuid.
        if let Some(owner) =
            deconflict::logical_name_owner(self.store.as_ref(), &record.logical_name, self.op_timeout)
                .await?
        {
            let owner = FileRecord::from_document(&Value::Object(owner))?;
            if owner.checksum.sha512 == record.checksum.sha512 {
                // Same file-version under another uuid: replica handling.
                return self.merge_replicas(owner, &record.locations).await;
            }
            return Err(CatalogError::FileVersionConflict {
                uuid: owner.uuid.to_string(),
            });
        }
        deconflict::check_locations(self.store.as_ref(), &record.locations, None, self.op_timeout)
            .await?;

        let mut record = record;
        record.stamp();
        let document = self.fingerprinted(&mut record)?;

        match bounded("insert record", self.op_timeout, self.store.insert(document)).await {
            Ok(()) => {
                tracing::debug!(uuid = %uuid, logical_name = %record.logical_name, "record created");
                Ok(CreateOutcome::Created { uuid })
            }
            Err(CoreError::DuplicateKey { index, .. }) => {
                // Race loser: the pre-checks passed but another create won
                // the insert. Report the winner.
                tracing::debug!(uuid = %uuid, index = %index, "create lost insert race");
                self.race_conflict(&uuid, &record.logical_name).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces a record wholesale.
    ///
    /// `expected_fingerprint` is the client's last-read fingerprint (from
    /// the `ETag`); when supplied and stale, the replace is rejected without
    /// applying any change.
    ///
    /// # Errors
    ///
    /// [`CatalogError::NotFound`] for an unknown uuid,
    /// [`CatalogError::VersionMismatch`] on a stale fingerprint, plus the
    /// validation/conflict errors of [`CatalogWriter::create`].
    pub async fn replace(
        &self,
        uuid: &FileUuid,
        candidate: Value,
        expected_fingerprint: Option<&str>,
    ) -> Result<Value> {
        let Value::Object(mut doc) = candidate else {
            return Err(CatalogError::validation("record must be a JSON object"));
        };

        let prior = self.fetch_or_not_found(uuid).await?;
        let prior = Value::Object(prior);

        validate::forbidden_drift(&Value::Object(doc.clone()), &prior)?;
        doc.insert("uuid".to_string(), Value::String(uuid.to_string()));
        check_fingerprint(uuid, &prior, expected_fingerprint)?;

        let candidate = Value::Object(doc);
        validate::validate_modification(&candidate, &prior)?;
        let record = FileRecord::from_document(&candidate)?;

        self.deconflict_update(uuid, &record).await?;
        self.persist(record).await
    }

    /// Applies a partial update: `patch` fields overwrite the stored record
    /// at the top level, omitted fields keep their prior values.
    ///
    /// The forbidden-field check runs on the raw patch, so a patch that is
    /// silent on an immutable field is never flagged.
    ///
    /// # Errors
    ///
    /// As for [`CatalogWriter::replace`].
    pub async fn patch(
        &self,
        uuid: &FileUuid,
        patch: Value,
        expected_fingerprint: Option<&str>,
    ) -> Result<Value> {
        let Value::Object(patch) = patch else {
            return Err(CatalogError::validation("patch must be a JSON object"));
        };

        let prior_doc = self.fetch_or_not_found(uuid).await?;
        let prior = Value::Object(prior_doc.clone());

        validate::forbidden_drift(&Value::Object(patch.clone()), &prior)?;
        check_fingerprint(uuid, &prior, expected_fingerprint)?;

        let mut merged = prior_doc;
        for (key, value) in patch {
            merged.insert(key, value);
        }
        merged.insert("uuid".to_string(), Value::String(uuid.to_string()));
        let merged = Value::Object(merged);

        validate::validate_modification(&merged, &prior)?;
        let record = FileRecord::from_document(&merged)?;

        self.deconflict_update(uuid, &record).await?;
        self.persist(record).await
    }

    /// Deletes a record by uuid.
    ///
    /// Deleting an already-deleted record reports [`CatalogError::NotFound`];
    /// the second delete is not a silent success.
    ///
    /// # Errors
    ///
    /// [`CatalogError::NotFound`] or a storage error.
    pub async fn delete(&self, uuid: &FileUuid) -> Result<()> {
        self.fetch_or_not_found(uuid).await?;
        match bounded(
            "delete record",
            self.op_timeout,
            self.store.delete_by_uuid(&uuid.to_string()),
        )
        .await
        {
            Ok(()) => {
                tracing::debug!(uuid = %uuid, "record deleted");
                Ok(())
            }
            // Raced with another delete between fetch and remove.
            Err(CoreError::NotFound(_)) => Err(CatalogError::NotFound {
                uuid: uuid.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Appends genuinely new locations to `existing`; every-location-known
    /// is a conflict, not a no-op.
    async fn merge_replicas(
        &self,
        mut existing: FileRecord,
        proposed: &[Location],
    ) -> Result<CreateOutcome> {
        let new_locations: Vec<Location> = proposed
            .iter()
            .filter(|p| !existing.locations.iter().any(|e| e.same_replica(p)))
            .cloned()
            .collect();

        if new_locations.is_empty() {
            return Err(CatalogError::ReplicaExists {
                uuid: existing.uuid.to_string(),
            });
        }

        // The appended locations must not belong to some third record.
        let ignore = existing.uuid.to_string();
        deconflict::check_locations(
            self.store.as_ref(),
            &new_locations,
            Some(ignore.as_str()),
            self.op_timeout,
        )
        .await?;

        let uuid = existing.uuid;
        tracing::debug!(
            uuid = %uuid,
            added = new_locations.len(),
            "appending replica locations to existing file-version"
        );
        existing.locations.extend(new_locations);
        self.persist(existing).await?;
        Ok(CreateOutcome::Merged { uuid })
    }

    async fn deconflict_update(&self, uuid: &FileUuid, record: &FileRecord) -> Result<()> {
        let ignore = uuid.to_string();
        deconflict::check_file_version(
            self.store.as_ref(),
            &record.logical_name,
            &record.checksum.sha512,
            Some(ignore.as_str()),
            self.op_timeout,
        )
        .await?;
        deconflict::check_locations(
            self.store.as_ref(),
            &record.locations,
            Some(ignore.as_str()),
            self.op_timeout,
        )
        .await
    }

    /// Restamps the modify date, stamps the fingerprint, and replaces the
    /// stored document.
    async fn persist(&self, mut record: FileRecord) -> Result<Value> {
        let uuid = record.uuid.to_string();
        record.stamp();
        let document = self.fingerprinted(&mut record)?;
        bounded(
            "replace record",
            self.op_timeout,
            self.store.replace(&uuid, document),
        )
        .await?;
        record.to_document()
    }

    /// Computes and stores the fingerprint, returning the document form.
    fn fingerprinted(&self, record: &mut FileRecord) -> Result<Document> {
        let value = record.to_document()?;
        let fingerprint = fingerprint_of(&value)?;
        record.meta_fingerprint = Some(fingerprint);
        match record.to_document()? {
            Value::Object(map) => Ok(map),
            _ => Err(CatalogError::InvariantViolation {
                message: "record did not serialize to an object".to_string(),
            }),
        }
    }

    async fn race_conflict(&self, uuid: &FileUuid, logical_name: &str) -> Result<CreateOutcome> {
        if let Some(winner) =
            deconflict::logical_name_owner(self.store.as_ref(), logical_name, self.op_timeout)
                .await?
        {
            let winner_uuid = winner
                .get("uuid")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(CatalogError::FileVersionConflict {
                uuid: winner_uuid.to_string(),
            });
        }
        if self.fetch(uuid).await?.is_some() {
            return Err(CatalogError::UuidConflict {
                uuid: uuid.to_string(),
            });
        }
        Err(CatalogError::InvariantViolation {
            message: "insert hit a duplicate key but no conflicting record is visible".to_string(),
        })
    }

    async fn fetch(&self, uuid: &FileUuid) -> Result<Option<Document>> {
        Ok(bounded(
            "find record by uuid",
            self.op_timeout,
            self.store.find_one(&json!({"uuid": uuid.to_string()})),
        )
        .await?)
    }

    async fn fetch_or_not_found(&self, uuid: &FileUuid) -> Result<Document> {
        self.fetch(uuid).await?.ok_or_else(|| CatalogError::NotFound {
            uuid: uuid.to_string(),
        })
    }
}

/// Compares the client's last-read fingerprint against the stored one.
///
/// No fingerprint supplied means an unconditional update.
fn check_fingerprint(uuid: &FileUuid, prior: &Value, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let stored = prior.get(FINGERPRINT_FIELD).and_then(Value::as_str);
    if stored == Some(expected) {
        Ok(())
    } else {
        Err(CatalogError::VersionMismatch {
            uuid: uuid.to_string(),
        })
    }
}
