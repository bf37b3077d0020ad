//! Events broadcast to embedding hosts (status panels, toasts, dashboards).
//!
//! Transient status text is best-effort; the authoritative state is the
//! progress counters and the persisted records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classification::Classification;
use super::session::{PendingStep, ProgressSnapshot, StepGroup};

/// Persistence phase a record event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PersistPhase {
    Created,
    Enriched,
    Invalidated,
}

/// Events emitted over the engine's broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AutomationEvent {
    SessionStarted {
        session_id: String,
        flow: String,
        total: usize,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        session_id: String,
        candidate: String,
        step: PendingStep,
        timestamp: DateTime<Utc>,
    },
    CandidateClassified {
        session_id: String,
        candidate: String,
        classification: Classification,
        timestamp: DateTime<Utc>,
    },
    RecordPersisted {
        session_id: String,
        candidate: String,
        record_id: String,
        phase: PersistPhase,
        timestamp: DateTime<Utc>,
    },
    /// A step-group lock exceeded its safety window and was force
    /// released; the in-flight candidate was treated as failed.
    LockRecovered {
        session_id: String,
        group: StepGroup,
        candidate: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Progress {
        session_id: String,
        progress: ProgressSnapshot,
        timestamp: DateTime<Utc>,
    },
    /// Best-effort transient status line for the UI.
    StatusText {
        session_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    SessionCompleted {
        session_id: String,
        progress: ProgressSnapshot,
        timestamp: DateTime<Utc>,
    },
    SessionStopped {
        session_id: String,
        reason: String,
        progress: ProgressSnapshot,
        timestamp: DateTime<Utc>,
    },
}
