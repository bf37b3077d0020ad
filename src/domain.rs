//! Domain module - Core entities and value objects
//!
//! Contains the session state model, batch candidates, outcome
//! classification, and the persisted record vocabulary shared by the
//! engine and the persister.

pub mod candidate;
pub mod classification;
pub mod events;
pub mod record;
pub mod session;

pub use candidate::CandidateItem;
pub use classification::{Classification, PhraseRules};
pub use events::AutomationEvent;
pub use record::{ExtractedFields, RecordId, RecordPatch};
pub use session::{AutomationSession, PendingStep, ProgressSnapshot, StepGroup};
