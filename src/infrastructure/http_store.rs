//! HTTP adapter for the document store.
//!
//! Talks to a collection-oriented REST endpoint: POST creates and returns
//! `{"id": "..."}`, PATCH merges, DELETE removes, and GET with
//! `field`/`notEqual` query parameters filters. Documents come back as
//! objects carrying their `id` alongside the fields.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::domain::record::RecordId;

use super::config::StoreConfig;
use super::store::{DocumentStore, StoreError, StoredRecord};

pub struct HttpDocumentStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDocumentStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut builder = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .gzip(true);
        if let Some(key) = &config.api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| StoreError::Request(e.to_string()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{}", self.base_url, collection)
    }

    fn document_url(&self, collection: &str, id: &RecordId) -> String {
        format!("{}/{}/{}", self.base_url, collection, id)
    }

    fn check(status: StatusCode, id: Option<&RecordId>) -> Result<(), StoreError> {
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(StoreError::NotFound(id.clone()));
            }
        }
        if !status.is_success() {
            return Err(StoreError::Request(format!("status {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn create(&self, collection: &str, body: Value) -> Result<RecordId, StoreError> {
        let response = self
            .client
            .post(self.collection_url(collection))
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Self::check(response.status(), None)?;
        let created: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Malformed("create response missing id".to_string()))?;
        debug!(collection, id, "document created");
        Ok(RecordId(id.to_string()))
    }

    async fn update(
        &self,
        collection: &str,
        id: &RecordId,
        patch: Value,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .patch(self.document_url(collection, id))
            .json(&patch)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Self::check(response.status(), Some(id))
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.document_url(collection, id))
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Self::check(response.status(), Some(id))
    }

    async fn query_where_not(
        &self,
        collection: &str,
        field: &str,
        not_equal: Value,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let response = self
            .client
            .get(self.collection_url(collection))
            .query(&[("field", field), ("notEqual", &not_equal.to_string())])
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Self::check(response.status(), None)?;
        let documents: Vec<Value> = response
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        documents
            .into_iter()
            .map(|mut doc| {
                let id = doc
                    .get("id")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .ok_or_else(|| {
                        StoreError::Malformed("document missing id".to_string())
                    })?;
                if let Some(map) = doc.as_object_mut() {
                    map.remove("id");
                }
                Ok(StoredRecord {
                    id: RecordId(id),
                    body: doc,
                })
            })
            .collect()
    }
}
