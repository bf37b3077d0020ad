//! Remote document store abstraction.
//!
//! The engine persists discovered records to a collection-oriented
//! document store. The trait keeps the controller testable (the in-memory
//! implementation backs the scenario tests) and isolates the HTTP wire
//! format in one adapter.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::record::RecordId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(RecordId),
    #[error("store request failed: {0}")]
    Request(String),
    #[error("store returned malformed data: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Malformed(err.to_string())
    }
}

/// A record as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: RecordId,
    pub body: Value,
}

impl StoredRecord {
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    pub fn field_bool(&self, key: &str) -> Option<bool> {
        self.body.get(key).and_then(Value::as_bool)
    }
}

/// Collection-oriented document store: create/update/delete by id plus a
/// single filtered query shape (field != value) used to source validation
/// candidates.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document, returning its store-assigned id.
    async fn create(&self, collection: &str, body: Value) -> Result<RecordId, StoreError>;

    /// Merge `patch` into an existing document. Absent fields are left
    /// untouched.
    async fn update(&self, collection: &str, id: &RecordId, patch: Value)
        -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &RecordId) -> Result<(), StoreError>;

    /// Documents where `field` is absent or differs from `not_equal`.
    async fn query_where_not(
        &self,
        collection: &str,
        field: &str,
        not_equal: Value,
    ) -> Result<Vec<StoredRecord>, StoreError>;
}
