//! Infrastructure: configuration, logging, and store adapters.

pub mod config;
pub mod http_store;
pub mod logging;
pub mod memory_store;
pub mod store;

pub use config::{AppConfig, ConfigManager, EngineConfig, LoggingConfig, StoreConfig};
pub use http_store::HttpDocumentStore;
pub use memory_store::MemoryDocumentStore;
pub use store::{DocumentStore, StoreError, StoredRecord};
