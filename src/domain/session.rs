//! In-memory automation session state.
//!
//! One `AutomationSession` exists per running flow instance. It is mutated
//! exclusively by the host-side event handlers; the sandbox communicates
//! only through one-way messages and never touches this state directly.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::candidate::CandidateItem;
use super::record::RecordId;

/// The step the per-item state machine is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PendingStep {
    /// No run in progress; handlers discard all signals.
    Idle,
    /// Waiting to inject the fill+submit instruction on the form page.
    AwaitFormSubmit,
    /// Fill+submit injected; waiting for the terminal result outcome.
    AwaitResult,
    /// Candidate found; waiting on the uncontrolled navigation to the
    /// detail page and on field extraction.
    AwaitDetailExtraction,
    /// Record created; waiting on the external registry lookup.
    AwaitSecondaryLookup,
    /// Advancing the loop; waiting for the cache-busted navigation back
    /// to the flow's starting page.
    AwaitReturnNavigation,
}

/// Logical phase protected as a unit by the lock subsystem. Two
/// uncorrelated signal sources (navigation completion and posted
/// messages) can each attempt to trigger the same step; the lock on its
/// group is the sole arbiter of which one acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepGroup {
    /// Fill+submit through result classification.
    Submit,
    /// Detail page readiness probing.
    PageProbe,
    /// Detail field extraction.
    Extract,
    /// Secondary registry lookup (fill, submit, extract).
    Lookup,
}

/// Run counters. `checked` is backed by a set so repeated success or
/// failure reports for the same candidate never inflate it.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    checked: HashSet<String>,
    pub found: u32,
    pub not_found: u32,
}

impl Progress {
    /// Idempotent: marking an already-checked candidate is a no-op.
    pub fn mark_checked(&mut self, candidate_id: &str) {
        if !candidate_id.is_empty() {
            self.checked.insert(candidate_id.to_string());
        }
    }

    pub fn checked_count(&self) -> usize {
        self.checked.len()
    }
}

/// Serializable snapshot of progress for event consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub total: usize,
    pub checked: usize,
    pub found: u32,
    pub not_found: u32,
    pub current_index: usize,
}

/// State of one running flow instance.
///
/// Created when the user starts a run, reset when the run completes or is
/// cancelled. The candidate list is immutable once loaded.
#[derive(Debug)]
pub struct AutomationSession {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    candidates: Vec<CandidateItem>,
    current_index: usize,
    pub pending_step: PendingStep,
    /// Last normalized URL each step group acted on; repeated
    /// navigation-completion events for the same (group, URL) pair are
    /// suppressed. Re-armed by cache-busted navigations, not by clearing.
    last_seen: HashMap<StepGroup, String>,
    pub progress: Progress,
    /// Back-reference to the record created for the current candidate;
    /// relinquished when the candidate reaches a terminal outcome.
    pub active_record_ref: Option<RecordId>,
    /// Host-side re-probe count for the current candidate's detail page.
    pub probe_attempts: u32,
}

impl AutomationSession {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            candidates: Vec::new(),
            current_index: 0,
            pending_step: PendingStep::Idle,
            last_seen: HashMap::new(),
            progress: Progress::default(),
            active_record_ref: None,
            probe_attempts: 0,
        }
    }

    /// Load the candidate list and reset all per-run state. Counters,
    /// dedupe history, and the record back-reference start fresh.
    pub fn begin(&mut self, candidates: Vec<CandidateItem>) {
        self.session_id = Uuid::new_v4().to_string();
        self.started_at = Utc::now();
        self.candidates = candidates;
        self.current_index = 0;
        self.pending_step = PendingStep::AwaitFormSubmit;
        self.last_seen.clear();
        self.progress = Progress::default();
        self.active_record_ref = None;
        self.probe_attempts = 0;
    }

    pub fn current_candidate(&self) -> Option<&CandidateItem> {
        self.candidates.get(self.current_index)
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn total(&self) -> usize {
        self.candidates.len()
    }

    /// Move to the next candidate, releasing the record back-reference
    /// and the probe budget. Returns false when the list is exhausted;
    /// the caller then ends the run.
    pub fn advance(&mut self) -> bool {
        self.active_record_ref = None;
        self.probe_attempts = 0;
        self.current_index += 1;
        self.current_index < self.candidates.len()
    }

    /// Record that `group` acted on `normalized_url`. Returns false when
    /// the pair was already seen, in which case the trigger must be
    /// ignored.
    pub fn note_seen(&mut self, group: StepGroup, normalized_url: &str) -> bool {
        match self.last_seen.get(&group) {
            Some(seen) if seen == normalized_url => false,
            _ => {
                self.last_seen.insert(group, normalized_url.to_string());
                true
            }
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.candidates.len(),
            checked: self.progress.checked_count(),
            found: self.progress.found,
            not_found: self.progress.not_found,
            current_index: self.current_index,
        }
    }
}

impl Default for AutomationSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_checked_is_idempotent() {
        let mut progress = Progress::default();
        progress.mark_checked("A1");
        progress.mark_checked("A1");
        progress.mark_checked("A2");
        progress.mark_checked("");
        assert_eq!(progress.checked_count(), 2);
    }

    #[test]
    fn advance_walks_the_list_in_order() {
        let mut session = AutomationSession::new();
        session.begin(vec![CandidateItem::new("A1"), CandidateItem::new("A2")]);
        assert_eq!(session.current_candidate().unwrap().id, "A1");
        assert!(session.advance());
        assert_eq!(session.current_candidate().unwrap().id, "A2");
        assert!(!session.advance());
        assert!(session.current_candidate().is_none());
    }

    #[test]
    fn note_seen_suppresses_repeated_pairs() {
        let mut session = AutomationSession::new();
        assert!(session.note_seen(StepGroup::Submit, "https://example.org/form"));
        assert!(!session.note_seen(StepGroup::Submit, "https://example.org/form"));
        // A cache-busted reload differs in URL, so it re-arms the check.
        assert!(session.note_seen(StepGroup::Submit, "https://example.org/form?t=17"));
        // Other groups track their own last-seen URL.
        assert!(session.note_seen(StepGroup::Extract, "https://example.org/form"));
    }

    #[test]
    fn begin_resets_counters_and_dedupe() {
        let mut session = AutomationSession::new();
        session.begin(vec![CandidateItem::new("A1")]);
        session.progress.mark_checked("A1");
        session.progress.found = 1;
        session.note_seen(StepGroup::Submit, "https://example.org/form");

        session.begin(vec![CandidateItem::new("B1")]);
        assert_eq!(session.progress.checked_count(), 0);
        assert_eq!(session.progress.found, 0);
        assert!(session.note_seen(StepGroup::Submit, "https://example.org/form"));
        assert_eq!(session.pending_step, PendingStep::AwaitFormSubmit);
    }
}
