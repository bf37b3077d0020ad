//! Autoform - Event-driven web form automation engine
//!
//! This crate drives multi-step batch interactions against third-party web
//! forms rendered inside a sandboxed page surface the host does not control
//! internally. The host can only inject scripts into the sandbox and receive
//! two uncorrelated asynchronous signals back: navigation completion and
//! posted messages. The engine sequences script injection, arbitrates the
//! two signal sources through per-step-group locks, classifies each batch
//! candidate's outcome, and persists discovered records to a remote
//! document store across enrichment phases.

pub mod domain;
pub mod engine;
pub mod application;
pub mod infrastructure;

// Re-export the types embedding hosts interact with most.
pub use domain::candidate::CandidateItem;
pub use domain::events::AutomationEvent;
pub use domain::session::{PendingStep, ProgressSnapshot, StepGroup};
pub use application::persister::{Identity, ResultPersister};
pub use engine::bus::{SandboxHandle, SandboxSignal};
pub use engine::controller::{EngineSettings, FlowController};
pub use engine::flow::FlowConfig;
pub use engine::runtime::{EngineCommand, EngineHandle, EngineRuntime};
pub use infrastructure::config::{AppConfig, ConfigManager};
pub use infrastructure::store::DocumentStore;
