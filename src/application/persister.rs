//! Result persister: bridges terminal classifications to the store.
//!
//! Create happens only after a usable detail extraction; later phases
//! enrich, flag, or delete by the id returned at creation. Writes require
//! a caller identity; reads (sourcing validation candidates) do not. The
//! persister also queries records whose validation flag is still unset.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::candidate::CandidateItem;
use crate::domain::record::{ExtractedFields, RecordId, RecordPatch};
use crate::infrastructure::store::{DocumentStore, StoreError};

/// Opaque caller identity stamped onto created records. The engine never
/// interprets it; the store side may use it for authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub String);

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// No signed-in caller; the persistence call is rejected. Only this
    /// call aborts, never the surrounding run.
    #[error("no caller identity, persistence rejected")]
    MissingIdentity,
    /// Extraction produced neither a strong id nor a birthdate; nothing
    /// identifying to persist.
    #[error("extracted fields carry no usable identity for candidate {0}")]
    UnusableFields(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ResultPersister<D: DocumentStore> {
    store: Arc<D>,
    collection: String,
    identity: Option<Identity>,
}

impl<D: DocumentStore> ResultPersister<D> {
    pub fn new(store: Arc<D>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            identity: None,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn store(&self) -> &Arc<D> {
        &self.store
    }

    fn identity(&self) -> Result<&Identity, PersistenceError> {
        self.identity.as_ref().ok_or(PersistenceError::MissingIdentity)
    }

    /// Persist a found candidate's extracted profile as a new record.
    /// The validation flag starts false; a later run flips or deletes it.
    pub async fn create_on_found(
        &self,
        candidate_id: &str,
        fields: &ExtractedFields,
    ) -> Result<RecordId, PersistenceError> {
        let identity = self.identity()?;
        if !fields.is_usable() {
            return Err(PersistenceError::UnusableFields(candidate_id.to_string()));
        }
        let mut body = json!({
            "candidateId": candidate_id,
            "primaryId": fields.primary_id,
            "name": fields.name,
            "birthdate": fields.birthdate,
            "validated": false,
            "createdBy": identity.0,
            "foundAt": Utc::now().to_rfc3339(),
        });
        if let Value::Object(map) = &mut body {
            let optional = [
                ("gender", &fields.gender),
                ("maritalStatus", &fields.marital_status),
                ("address", &fields.address),
                ("postalCode", &fields.postal_code),
                ("phone", &fields.phone),
                ("taxId", &fields.tax_id),
                ("email", &fields.email),
            ];
            for (key, value) in optional {
                if let Some(v) = value {
                    map.insert(key.to_string(), json!(v));
                }
            }
        }
        let id = self.store.create(&self.collection, body).await?;
        info!(candidate = candidate_id, record = %id, "📝 record created");
        Ok(id)
    }

    /// Merge an enrichment patch into an existing record.
    pub async fn enrich(
        &self,
        record_id: &RecordId,
        patch: &RecordPatch,
    ) -> Result<(), PersistenceError> {
        self.identity()?;
        if patch.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_value(patch).map_err(StoreError::from)?;
        self.store.update(&self.collection, record_id, body).await?;
        info!(record = %record_id, "record enriched");
        Ok(())
    }

    /// Delete a record the registry proved spurious.
    pub async fn invalidate(&self, record_id: &RecordId) -> Result<(), PersistenceError> {
        self.identity()?;
        self.store.delete(&self.collection, record_id).await?;
        warn!(record = %record_id, "🗑️ record invalidated");
        Ok(())
    }

    /// Source candidates for a validation run: every record whose
    /// validation flag is not yet true, carrying its store id as the
    /// back-reference and its strong id as the lookup value. Read-only,
    /// so no identity is required.
    pub async fn pending_validation(&self) -> Result<Vec<CandidateItem>, PersistenceError> {
        let records = self
            .store
            .query_where_not(&self.collection, "validated", json!(true))
            .await?;
        let candidates = records
            .into_iter()
            .filter_map(|rec| {
                let candidate_id = rec.field_str("candidateId")?.to_string();
                let mut item = CandidateItem::new(candidate_id).with_record_ref(rec.id.clone());
                if let Some(primary) = rec.field_str("primaryId") {
                    item = item.with_secondary_id(primary);
                }
                if let Some(name) = rec.field_str("name") {
                    item = item.with_name(name);
                }
                Some(item)
            })
            .collect();
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::MemoryDocumentStore;

    fn persister() -> ResultPersister<MemoryDocumentStore> {
        ResultPersister::new(Arc::new(MemoryDocumentStore::new()), "foundUser")
            .with_identity(Identity("operator-1".to_string()))
    }

    fn usable_fields() -> ExtractedFields {
        ExtractedFields {
            primary_id: "3173000000000001".to_string(),
            name: "BUDI SANTOSO".to_string(),
            birthdate: "1990-01-31".to_string(),
            ..ExtractedFields::default()
        }
    }

    #[tokio::test]
    async fn create_then_enrich_then_invalidate() {
        let p = persister();
        let id = p.create_on_found("2409000123", &usable_fields()).await.unwrap();

        let patch = RecordPatch::validated(
            "BUDI SANTOSO".to_string(),
            "MENTENG".to_string(),
            "JAKARTA PUSAT".to_string(),
        );
        p.enrich(&id, &patch).await.unwrap();

        let docs = p.store().dump("foundUser");
        assert_eq!(docs[0].field_bool("validated"), Some(true));
        assert_eq!(docs[0].field_str("locality"), Some("MENTENG"));
        assert_eq!(docs[0].field_str("nameSource"), Some("registry"));
        assert_eq!(docs[0].field_str("createdBy"), Some("operator-1"));

        p.invalidate(&id).await.unwrap();
        assert!(p.store().is_empty("foundUser"));
    }

    #[tokio::test]
    async fn writes_without_identity_are_rejected() {
        let anonymous: ResultPersister<MemoryDocumentStore> =
            ResultPersister::new(Arc::new(MemoryDocumentStore::new()), "foundUser");
        let err = anonymous
            .create_on_found("2409000123", &usable_fields())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::MissingIdentity));
        assert!(anonymous.store().is_empty("foundUser"));
        // Reads stay available without identity.
        assert!(anonymous.pending_validation().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unusable_extraction_is_rejected_before_the_store() {
        let p = persister();
        let err = p
            .create_on_found("2409000123", &ExtractedFields::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::UnusableFields(_)));
        assert!(p.store().is_empty("foundUser"));
    }

    #[tokio::test]
    async fn pending_validation_maps_records_to_candidates() {
        let p = persister();
        let id = p.create_on_found("2409000123", &usable_fields()).await.unwrap();
        p.create_on_found("2409000456", &usable_fields()).await.unwrap();
        // Mark the first validated; only the second should come back.
        p.enrich(
            &id,
            &RecordPatch {
                validated: Some(true),
                ..RecordPatch::default()
            },
        )
        .await
        .unwrap();

        let pending = p.pending_validation().await.unwrap();
        assert_eq!(pending.len(), 1);
        let item = &pending[0];
        assert_eq!(item.id, "2409000456");
        assert_eq!(item.lookup_value(), "3173000000000001");
        assert!(item.record_ref.is_some());
        assert_eq!(item.name.as_deref(), Some("BUDI SANTOSO"));
    }

    #[tokio::test]
    async fn empty_patch_skips_the_store_round_trip() {
        let p = persister();
        let id = p.create_on_found("2409000123", &usable_fields()).await.unwrap();
        p.enrich(&id, &RecordPatch::default()).await.unwrap();
        assert_eq!(p.store().len("foundUser"), 1);
    }
}
