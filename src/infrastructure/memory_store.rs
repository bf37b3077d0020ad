//! In-memory `DocumentStore` used by tests and offline runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::record::RecordId;

use super::store::{DocumentStore, StoreError, StoredRecord};

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All documents in a collection, for assertions.
    pub fn dump(&self, collection: &str) -> Vec<StoredRecord> {
        let guard = match self.collections.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, body)| StoredRecord {
                        id: RecordId(id.clone()),
                        body: body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.dump(collection).len()
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, collection: &str, body: Value) -> Result<RecordId, StoreError> {
        let id = Uuid::new_v4().to_string();
        let mut guard = self
            .collections
            .lock()
            .map_err(|e| StoreError::Request(e.to_string()))?;
        guard
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), body);
        Ok(RecordId(id))
    }

    async fn update(
        &self,
        collection: &str,
        id: &RecordId,
        patch: Value,
    ) -> Result<(), StoreError> {
        let mut guard = self
            .collections
            .lock()
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let doc = guard
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id.as_str()))
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if let (Value::Object(target), Value::Object(fields)) = (doc, patch) {
            for (k, v) in fields {
                target.insert(k, v);
            }
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> Result<(), StoreError> {
        let mut guard = self
            .collections
            .lock()
            .map_err(|e| StoreError::Request(e.to_string()))?;
        guard
            .get_mut(collection)
            .and_then(|docs| docs.remove(id.as_str()))
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(())
    }

    async fn query_where_not(
        &self,
        collection: &str,
        field: &str,
        not_equal: Value,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self
            .dump(collection)
            .into_iter()
            .filter(|rec| rec.body.get(field) != Some(&not_equal))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn crud_round_trip() {
        let store = MemoryDocumentStore::new();
        let id = store
            .create("foundUser", json!({"kpj": "2409000123", "validated": false}))
            .await
            .unwrap();

        store
            .update("foundUser", &id, json!({"validated": true, "name": "BUDI"}))
            .await
            .unwrap();
        let docs = store.dump("foundUser");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].field_bool("validated"), Some(true));
        assert_eq!(docs[0].field_str("kpj"), Some("2409000123"));

        store.delete("foundUser", &id).await.unwrap();
        assert!(store.is_empty("foundUser"));
    }

    #[tokio::test]
    async fn query_where_not_includes_missing_fields() {
        let store = MemoryDocumentStore::new();
        store
            .create("foundUser", json!({"kpj": "A", "validated": true}))
            .await
            .unwrap();
        store
            .create("foundUser", json!({"kpj": "B", "validated": false}))
            .await
            .unwrap();
        store.create("foundUser", json!({"kpj": "C"})).await.unwrap();

        let pending = store
            .query_where_not("foundUser", "validated", json!(true))
            .await
            .unwrap();
        let mut ids: Vec<_> = pending
            .iter()
            .filter_map(|r| r.field_str("kpj"))
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn update_of_missing_record_is_an_error() {
        let store = MemoryDocumentStore::new();
        let err = store
            .update("foundUser", &RecordId("nope".into()), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
