//! The per-item state machine and batch loop.
//!
//! `FlowController` owns one session: the candidate cursor, the step-group
//! locks, and the pending-step marker. It is driven exclusively by the two
//! sandbox signals. Handlers are cooperative and never block on the
//! sandbox; every injection is fire-and-forget and progress resumes only
//! when the next signal arrives.
//!
//! Signal choreography for a step trigger, in order: acquire the step
//! group's lock (staleness is detected here, even for an already-seen
//! URL), then check the (group, URL) dedupe pair, then act. A lock
//! acquired for a URL the group already acted on is released untouched,
//! which makes duplicate signal delivery harmless.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::application::persister::ResultPersister;
use crate::domain::candidate::CandidateItem;
use crate::domain::classification::Classification;
use crate::domain::events::{AutomationEvent, PersistPhase};
use crate::domain::record::{RecordId, RecordPatch};
use crate::domain::session::{AutomationSession, PendingStep, StepGroup};
use crate::infrastructure::store::DocumentStore;

use super::bus::{
    normalize_url, parse_message, with_cache_buster, PageCheckPayload, ProcessPayload,
    SandboxHandle, SandboxMessage, SandboxSignal, StepId,
};
use super::flow::{FlowConfig, PersistMode};
use super::injector::{PollingSpec, ScriptInjector};
use super::locks::{LockAcquire, StepLocks};

/// Tunables the controller needs from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub polling: PollingSpec,
    /// Safety window after which a held step lock is considered stuck.
    pub lock_stale_after: Duration,
    /// Host-side cap on detail page readiness re-probes per candidate.
    pub probe_budget: u32,
    /// JS expression naming the sandbox's message bridge object.
    pub bridge_object: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            polling: PollingSpec::default(),
            lock_stale_after: Duration::from_secs(12),
            probe_budget: 10,
            bridge_object: "window.__host".to_string(),
        }
    }
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct FlowController<S: SandboxHandle, D: DocumentStore> {
    sandbox: Arc<S>,
    persister: ResultPersister<D>,
    flow: FlowConfig,
    injector: ScriptInjector,
    session: AutomationSession,
    locks: StepLocks,
    probe_budget: u32,
    events: broadcast::Sender<AutomationEvent>,
}

impl<S: SandboxHandle, D: DocumentStore> FlowController<S, D> {
    pub fn new(
        sandbox: Arc<S>,
        persister: ResultPersister<D>,
        flow: FlowConfig,
        settings: EngineSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let injector = ScriptInjector::new(settings.bridge_object, settings.polling);
        Self {
            sandbox,
            persister,
            flow,
            injector,
            session: AutomationSession::new(),
            locks: StepLocks::new(settings.lock_stale_after),
            probe_budget: settings.probe_budget,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &AutomationSession {
        &self.session
    }

    pub fn flow(&self) -> &FlowConfig {
        &self.flow
    }

    pub fn persister(&self) -> &ResultPersister<D> {
        &self.persister
    }

    /// Whether this flow drives candidates through the lookup chain
    /// instead of the fill+submit form (store-sourced validation runs).
    fn lookup_driven(&self) -> bool {
        self.flow.persist == PersistMode::UpdateOrDelete && self.flow.secondary.is_some()
    }

    /// Begin a run over `candidates`. The first navigation kicks the
    /// state machine; everything after that is signal-driven.
    pub fn start(&mut self, candidates: Vec<CandidateItem>) {
        self.locks.release_all();
        self.session.begin(candidates);
        if self.lookup_driven() {
            self.session.pending_step = PendingStep::AwaitSecondaryLookup;
        }
        info!(
            session = %self.session.session_id,
            flow = %self.flow.name,
            total = self.session.total(),
            "🚀 automation session started"
        );
        self.emit(AutomationEvent::SessionStarted {
            session_id: self.session.session_id.clone(),
            flow: self.flow.name.clone(),
            total: self.session.total(),
            timestamp: Utc::now(),
        });
        if self.session.total() == 0 {
            self.complete();
            return;
        }
        self.emit_progress();
        self.sandbox.navigate(&self.start_page());
    }

    /// Cancel the run. Locks are released, the pending step returns to
    /// idle, and subsequent signals are discarded.
    pub fn stop(&mut self, reason: &str) {
        if self.session.pending_step == PendingStep::Idle {
            return;
        }
        self.locks.release_all();
        self.session.pending_step = PendingStep::Idle;
        info!(session = %self.session.session_id, reason, "⏹️ session stopped");
        self.emit(AutomationEvent::SessionStopped {
            session_id: self.session.session_id.clone(),
            reason: reason.to_string(),
            progress: self.session.snapshot(),
            timestamp: Utc::now(),
        });
    }

    pub async fn handle_signal(&mut self, signal: SandboxSignal) {
        if self.session.pending_step == PendingStep::Idle {
            debug!("signal discarded, no run in progress");
            return;
        }
        match signal {
            SandboxSignal::NavigationCompleted { url } => self.on_navigation(&url).await,
            SandboxSignal::Message { body } => {
                if let Some(message) = parse_message(&body) {
                    self.on_message(message).await;
                }
            }
        }
    }

    fn start_page(&self) -> String {
        if self.lookup_driven() {
            self.flow
                .secondary
                .as_ref()
                .map(|l| l.start_url.clone())
                .unwrap_or_else(|| self.flow.start_url.clone())
        } else {
            self.flow.start_url.clone()
        }
    }

    // ---- navigation-completion side ------------------------------------

    async fn on_navigation(&mut self, url: &str) {
        let normalized = normalize_url(url);
        debug!(step = ?self.session.pending_step, url = %normalized, "navigation completed");
        match self.session.pending_step {
            PendingStep::Idle => {}
            PendingStep::AwaitFormSubmit | PendingStep::AwaitResult => {
                self.try_submit(&normalized).await;
            }
            PendingStep::AwaitReturnNavigation => {
                if self.lookup_driven() {
                    if self.lookup_page_matches(&normalized) {
                        self.session.pending_step = PendingStep::AwaitSecondaryLookup;
                        self.try_lookup_fill(&normalized).await;
                    }
                } else if self.flow.form_page.matches(&normalized) {
                    self.session.pending_step = PendingStep::AwaitFormSubmit;
                    self.try_submit(&normalized).await;
                } else {
                    self.maybe_redirect(&normalized);
                }
            }
            PendingStep::AwaitDetailExtraction => {
                self.try_probe(&normalized).await;
            }
            PendingStep::AwaitSecondaryLookup => {
                self.try_lookup_fill(&normalized).await;
            }
        }
    }

    /// Inject the post-login redirect helper when the sandbox landed
    /// inside the site but off the working page. Only between candidates;
    /// a mid-candidate navigation elsewhere on the site must not be
    /// steered away from.
    fn maybe_redirect(&self, normalized: &str) {
        if !matches!(
            self.session.pending_step,
            PendingStep::AwaitFormSubmit | PendingStep::AwaitReturnNavigation
        ) {
            return;
        }
        if self.flow.auto_redirect
            && normalized.contains(&self.flow.site_root)
            && !self.flow.form_page.matches(normalized)
        {
            // Cache-busted target: the form URL may already be in the
            // Submit dedupe map from the previous candidate, and a bare
            // reload of it would be suppressed with no lock held.
            let target = with_cache_buster(&self.flow.start_url);
            self.sandbox
                .inject(&self.injector.auto_redirect(&self.flow.site_root, &target));
        }
    }

    /// Submit trigger: lock first (staleness surfaces here), dedupe
    /// second, inject third.
    async fn try_submit(&mut self, normalized: &str) {
        if !self.flow.form_page.matches(normalized) {
            self.maybe_redirect(normalized);
            return;
        }
        match self.locks.try_acquire(StepGroup::Submit, Instant::now()) {
            LockAcquire::Contended => {}
            LockAcquire::StaleReleased => self.recover(StepGroup::Submit).await,
            LockAcquire::Acquired => {
                if !self.session.note_seen(StepGroup::Submit, normalized) {
                    self.locks.release(StepGroup::Submit);
                    return;
                }
                let Some(candidate) = self.session.current_candidate().cloned() else {
                    self.locks.release(StepGroup::Submit);
                    self.complete();
                    return;
                };
                self.session.pending_step = PendingStep::AwaitResult;
                info!(candidate = %candidate.id, "⚙️ submitting candidate");
                self.emit_step(&candidate.id, PendingStep::AwaitResult);
                self.sandbox
                    .inject(&self.injector.fill_and_submit(&self.flow.form, &candidate.id));
            }
        }
    }

    async fn try_probe(&mut self, normalized: &str) {
        let Some(detail_page) = self.flow.detail_page.as_ref() else {
            return;
        };
        if !detail_page.matches(normalized) {
            return;
        }
        match self.locks.try_acquire(StepGroup::PageProbe, Instant::now()) {
            LockAcquire::Contended => {}
            LockAcquire::StaleReleased => self.recover(StepGroup::PageProbe).await,
            LockAcquire::Acquired => {
                if !self.session.note_seen(StepGroup::PageProbe, normalized) {
                    self.locks.release(StepGroup::PageProbe);
                    return;
                }
                self.inject_probe();
            }
        }
    }

    fn inject_probe(&self) {
        if let Some(detail) = self.flow.detail.as_ref() {
            self.sandbox.inject(&self.injector.detail_probe(detail));
        }
    }

    fn lookup_page_matches(&self, normalized: &str) -> bool {
        self.flow
            .secondary
            .as_ref()
            .is_some_and(|l| l.page.matches(normalized))
    }

    async fn try_lookup_fill(&mut self, normalized: &str) {
        if !self.lookup_page_matches(normalized) {
            return;
        }
        match self.locks.try_acquire(StepGroup::Lookup, Instant::now()) {
            LockAcquire::Contended => {}
            LockAcquire::StaleReleased => self.recover(StepGroup::Lookup).await,
            LockAcquire::Acquired => {
                if !self.session.note_seen(StepGroup::Lookup, normalized) {
                    self.locks.release(StepGroup::Lookup);
                    return;
                }
                let Some(candidate) = self.session.current_candidate().cloned() else {
                    self.locks.release(StepGroup::Lookup);
                    self.complete();
                    return;
                };
                let Some(lookup) = self.flow.secondary.as_ref() else {
                    self.locks.release(StepGroup::Lookup);
                    return;
                };
                info!(candidate = %candidate.id, "🔍 starting registry lookup");
                self.emit_step(&candidate.id, PendingStep::AwaitSecondaryLookup);
                self.sandbox
                    .inject(&self.injector.lookup_fill(lookup, candidate.lookup_value()));
            }
        }
    }

    // ---- posted-message side -------------------------------------------

    async fn on_message(&mut self, message: SandboxMessage) {
        match message {
            SandboxMessage::Process { step, payload } => match step {
                StepId::Submit => self.on_submit_progress(payload).await,
                StepId::Result => self.on_result(payload).await,
                StepId::Extract => self.on_extract(payload).await,
                StepId::LookupFill => self.on_lookup_fill(payload).await,
                StepId::LookupSubmit => self.on_lookup_submit(payload).await,
                StepId::LookupResult => self.on_lookup_result(payload).await,
            },
            SandboxMessage::PageCheck(payload) => self.on_page_check(payload).await,
            SandboxMessage::Unlock { step } => {
                let group = step_group_of(step);
                if self.locks.release(group) {
                    debug!(?group, "lock released by sandbox unlock message");
                }
            }
            SandboxMessage::AutoRedirect { phase, url } => {
                self.emit_status(format!(
                    "redirecting ({}) from {}",
                    phase.unwrap_or_default(),
                    url.unwrap_or_default()
                ));
            }
        }
    }

    async fn on_submit_progress(&mut self, payload: ProcessPayload) {
        if self.session.pending_step != PendingStep::AwaitResult {
            return;
        }
        if payload.ok {
            self.emit_status(format!(
                "submitted {}",
                payload.candidate.unwrap_or_default()
            ));
        } else {
            warn!(
                candidate = payload.candidate.as_deref().unwrap_or(""),
                reason = payload.reason.as_deref().unwrap_or("unknown"),
                "submit step failed"
            );
            self.locks.release(StepGroup::Submit);
            self.fail_current().await;
        }
    }

    /// Terminal outcome of the primary form step. Classification of the
    /// raw result text happens here, host-side, against the flow's phrase
    /// categories.
    async fn on_result(&mut self, payload: ProcessPayload) {
        if self.session.pending_step != PendingStep::AwaitResult {
            return;
        }
        self.locks.release(StepGroup::Submit);
        let Some(candidate) = self.session.current_candidate().cloned() else {
            self.complete();
            return;
        };
        if !payload.ok {
            warn!(
                candidate = %candidate.id,
                reason = payload.reason.as_deref().unwrap_or("unknown"),
                "result step failed"
            );
            self.fail_current().await;
            return;
        }

        let text = payload.text.unwrap_or_default();
        let classification = self.flow.phrases.classify(&text);
        info!(candidate = %candidate.id, ?classification, "candidate classified");
        self.session.progress.mark_checked(&candidate.id);
        self.emit(AutomationEvent::CandidateClassified {
            session_id: self.session.session_id.clone(),
            candidate: candidate.id.clone(),
            classification,
            timestamp: Utc::now(),
        });

        match classification {
            Classification::Found => {
                self.session.progress.found += 1;
                match self.flow.persist {
                    PersistMode::CreateOnFound if self.flow.has_detail_phase() => {
                        // The sandbox navigates to the detail page on its
                        // own after the confirm click; the probe waits for
                        // that navigation.
                        self.session.pending_step = PendingStep::AwaitDetailExtraction;
                        self.emit_step(&candidate.id, PendingStep::AwaitDetailExtraction);
                    }
                    PersistMode::UpdateFlag => {
                        self.apply_patch(&candidate, RecordPatch::eligibility(true, None))
                            .await;
                        self.advance_or_complete().await;
                    }
                    _ => {
                        self.advance_or_complete().await;
                    }
                }
            }
            Classification::NotFound | Classification::CannotUse => {
                self.session.progress.not_found += 1;
                if self.flow.persist == PersistMode::UpdateFlag {
                    let reason = if classification == Classification::CannotUse {
                        Some("blocked".to_string())
                    } else {
                        payload.reason
                    };
                    self.apply_patch(&candidate, RecordPatch::eligibility(false, reason))
                        .await;
                }
                self.advance_or_complete().await;
            }
        }
    }

    async fn on_page_check(&mut self, payload: PageCheckPayload) {
        if self.session.pending_step != PendingStep::AwaitDetailExtraction {
            return;
        }
        self.locks.release(StepGroup::PageProbe);
        if payload.ready {
            match self.locks.try_acquire(StepGroup::Extract, Instant::now()) {
                LockAcquire::Contended => {}
                LockAcquire::StaleReleased => self.recover(StepGroup::Extract).await,
                LockAcquire::Acquired => {
                    let (Some(candidate), Some(detail)) = (
                        self.session.current_candidate().cloned(),
                        self.flow.detail.as_ref(),
                    ) else {
                        self.locks.release(StepGroup::Extract);
                        return;
                    };
                    self.sandbox
                        .inject(&self.injector.detail_extract(detail, &candidate.id));
                }
            }
            return;
        }
        self.session.probe_attempts += 1;
        if self.session.probe_attempts >= self.probe_budget {
            warn!(
                attempts = self.session.probe_attempts,
                "detail page never became ready, giving up on candidate"
            );
            self.advance_or_complete().await;
        } else {
            debug!(
                attempt = self.session.probe_attempts,
                budget = self.probe_budget,
                "detail page not ready, re-probing"
            );
            self.inject_probe();
        }
    }

    /// Terminal outcome of detail extraction. A usable field set becomes a
    /// new record; afterwards the candidate either enters the inline
    /// lookup or the loop advances.
    async fn on_extract(&mut self, payload: ProcessPayload) {
        if self.session.pending_step != PendingStep::AwaitDetailExtraction {
            return;
        }
        self.locks.release(StepGroup::Extract);
        let Some(candidate) = self.session.current_candidate().cloned() else {
            self.complete();
            return;
        };
        let fields = match (payload.ok, payload.fields) {
            (true, Some(fields)) => fields,
            _ => {
                warn!(
                    candidate = %candidate.id,
                    reason = payload.reason.as_deref().unwrap_or("unknown"),
                    "extraction failed, no record persisted"
                );
                self.advance_or_complete().await;
                return;
            }
        };
        match self.persister.create_on_found(&candidate.id, &fields).await {
            Ok(record_id) => {
                self.session.active_record_ref = Some(record_id.clone());
                self.emit(AutomationEvent::RecordPersisted {
                    session_id: self.session.session_id.clone(),
                    candidate: candidate.id.clone(),
                    record_id: record_id.to_string(),
                    phase: PersistPhase::Created,
                    timestamp: Utc::now(),
                });
                if let Some(lookup) = self.flow.secondary.as_ref() {
                    self.session.pending_step = PendingStep::AwaitSecondaryLookup;
                    self.emit_step(&candidate.id, PendingStep::AwaitSecondaryLookup);
                    self.sandbox.navigate(&with_cache_buster(&lookup.start_url));
                } else {
                    self.advance_or_complete().await;
                }
            }
            Err(err) => {
                warn!(candidate = %candidate.id, error = %err, "record creation failed");
                self.advance_or_complete().await;
            }
        }
    }

    async fn on_lookup_fill(&mut self, payload: ProcessPayload) {
        if self.session.pending_step != PendingStep::AwaitSecondaryLookup {
            return;
        }
        if !payload.ok {
            self.lookup_failed(payload.reason.as_deref().unwrap_or("fillFailed"))
                .await;
            return;
        }
        if let Some(lookup) = self.flow.secondary.as_ref() {
            self.sandbox.inject(&self.injector.lookup_submit(lookup));
        }
    }

    async fn on_lookup_submit(&mut self, payload: ProcessPayload) {
        if self.session.pending_step != PendingStep::AwaitSecondaryLookup {
            return;
        }
        if !payload.ok {
            self.lookup_failed(payload.reason.as_deref().unwrap_or("submitFailed"))
                .await;
            return;
        }
        let (Some(lookup), Some(candidate)) = (
            self.flow.secondary.as_ref(),
            self.session.current_candidate(),
        ) else {
            return;
        };
        let value = candidate.lookup_value().to_string();
        self.sandbox.inject(&self.injector.lookup_extract(lookup, &value));
    }

    /// Terminal outcome of the registry lookup. Registered enriches the
    /// backing record with the canonical name and region; not-registered
    /// deletes it. The found counter reflects the primary classification
    /// and is never walked back by an invalidation.
    async fn on_lookup_result(&mut self, payload: ProcessPayload) {
        if self.session.pending_step != PendingStep::AwaitSecondaryLookup {
            return;
        }
        self.locks.release(StepGroup::Lookup);
        let Some(candidate) = self.session.current_candidate().cloned() else {
            self.complete();
            return;
        };
        if payload.ok {
            let patch = RecordPatch::validated(
                payload.name.unwrap_or_default(),
                payload.locality.unwrap_or_default(),
                payload.region.unwrap_or_default(),
            );
            if let Some(record_id) = self.current_record_ref(&candidate) {
                match self.persister.enrich(&record_id, &patch).await {
                    Ok(()) => self.emit(AutomationEvent::RecordPersisted {
                        session_id: self.session.session_id.clone(),
                        candidate: candidate.id.clone(),
                        record_id: record_id.to_string(),
                        phase: PersistPhase::Enriched,
                        timestamp: Utc::now(),
                    }),
                    Err(err) => {
                        warn!(candidate = %candidate.id, error = %err, "enrichment failed")
                    }
                }
            }
            if self.lookup_driven() {
                self.session.progress.found += 1;
                self.session.progress.mark_checked(&candidate.id);
            }
        } else if payload.reason.as_deref() == Some("notRegistered") {
            if let Some(record_id) = self.current_record_ref(&candidate) {
                match self.persister.invalidate(&record_id).await {
                    Ok(()) => self.emit(AutomationEvent::RecordPersisted {
                        session_id: self.session.session_id.clone(),
                        candidate: candidate.id.clone(),
                        record_id: record_id.to_string(),
                        phase: PersistPhase::Invalidated,
                        timestamp: Utc::now(),
                    }),
                    Err(err) => {
                        warn!(candidate = %candidate.id, error = %err, "invalidation failed")
                    }
                }
            }
            if self.lookup_driven() {
                self.session.progress.not_found += 1;
                self.session.progress.mark_checked(&candidate.id);
            }
        } else {
            // Timeout or page breakage: the record (when one exists) is
            // left exactly as created; a later validation run retries it.
            warn!(
                candidate = %candidate.id,
                reason = payload.reason.as_deref().unwrap_or("unknown"),
                "lookup inconclusive, record left untouched"
            );
            if self.lookup_driven() {
                self.session.progress.mark_checked(&candidate.id);
            }
        }
        self.advance_or_complete().await;
    }

    fn current_record_ref(&self, candidate: &CandidateItem) -> Option<RecordId> {
        self.session
            .active_record_ref
            .clone()
            .or_else(|| candidate.record_ref.clone())
    }

    async fn lookup_failed(&mut self, reason: &str) {
        self.locks.release(StepGroup::Lookup);
        warn!(reason, "lookup chain failed, record left untouched");
        if self.lookup_driven() {
            if let Some(candidate) = self.session.current_candidate() {
                let id = candidate.id.clone();
                self.session.progress.mark_checked(&id);
            }
        }
        self.advance_or_complete().await;
    }

    /// Apply a flag patch to the candidate's backing record, if any.
    async fn apply_patch(&mut self, candidate: &CandidateItem, patch: RecordPatch) {
        let Some(record_id) = self.current_record_ref(candidate) else {
            debug!(candidate = %candidate.id, "no backing record, patch skipped");
            return;
        };
        match self.persister.enrich(&record_id, &patch).await {
            Ok(()) => self.emit(AutomationEvent::RecordPersisted {
                session_id: self.session.session_id.clone(),
                candidate: candidate.id.clone(),
                record_id: record_id.to_string(),
                phase: PersistPhase::Enriched,
                timestamp: Utc::now(),
            }),
            Err(err) => warn!(candidate = %candidate.id, error = %err, "patch failed"),
        }
    }

    // ---- loop control ----------------------------------------------------

    /// A step failed terminally for the current candidate: count it as
    /// checked (never found or not-found) and move on.
    async fn fail_current(&mut self) {
        if let Some(candidate) = self.session.current_candidate() {
            let id = candidate.id.clone();
            self.session.progress.mark_checked(&id);
        }
        self.advance_or_complete().await;
    }

    /// Stale lock recovery: the in-flight candidate is treated as failed,
    /// the recovery is surfaced as an event, and the loop advances. Never
    /// silent continuation.
    async fn recover(&mut self, group: StepGroup) {
        let candidate = self.session.current_candidate().map(|c| c.id.clone());
        warn!(?group, candidate = candidate.as_deref().unwrap_or(""), "⚠️ recovering from stale lock");
        self.emit(AutomationEvent::LockRecovered {
            session_id: self.session.session_id.clone(),
            group,
            candidate: candidate.clone(),
            timestamp: Utc::now(),
        });
        if let Some(id) = candidate {
            self.session.progress.mark_checked(&id);
        }
        self.advance_or_complete().await;
    }

    /// Advance the cursor and force a fresh, cache-busted navigation back
    /// to the flow's starting page. The new URL differs from anything the
    /// dedupe map has seen, so the next navigation-completion re-arms the
    /// submit trigger.
    async fn advance_or_complete(&mut self) {
        self.emit_progress();
        if self.session.advance() {
            self.session.pending_step = PendingStep::AwaitReturnNavigation;
            self.sandbox.navigate(&with_cache_buster(&self.start_page()));
        } else {
            self.complete();
        }
    }

    fn complete(&mut self) {
        self.locks.release_all();
        self.session.pending_step = PendingStep::Idle;
        let snapshot = self.session.snapshot();
        info!(
            session = %self.session.session_id,
            checked = snapshot.checked,
            found = snapshot.found,
            not_found = snapshot.not_found,
            "✅ session completed"
        );
        self.emit(AutomationEvent::SessionCompleted {
            session_id: self.session.session_id.clone(),
            progress: snapshot,
            timestamp: Utc::now(),
        });
    }

    // ---- events ----------------------------------------------------------

    fn emit(&self, event: AutomationEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    fn emit_progress(&self) {
        self.emit(AutomationEvent::Progress {
            session_id: self.session.session_id.clone(),
            progress: self.session.snapshot(),
            timestamp: Utc::now(),
        });
    }

    fn emit_step(&self, candidate: &str, step: PendingStep) {
        self.emit(AutomationEvent::StepStarted {
            session_id: self.session.session_id.clone(),
            candidate: candidate.to_string(),
            step,
            timestamp: Utc::now(),
        });
    }

    fn emit_status(&self, message: String) {
        self.emit(AutomationEvent::StatusText {
            session_id: self.session.session_id.clone(),
            message,
            timestamp: Utc::now(),
        });
    }
}

fn step_group_of(step: StepId) -> StepGroup {
    match step {
        StepId::Submit | StepId::Result => StepGroup::Submit,
        StepId::Extract => StepGroup::Extract,
        StepId::LookupFill | StepId::LookupSubmit | StepId::LookupResult => StepGroup::Lookup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::persister::Identity;
    use crate::infrastructure::memory_store::MemoryDocumentStore;
    use std::sync::Mutex;

    /// Records every injection and navigation for assertions.
    #[derive(Default)]
    struct FakeSandbox {
        injected: Mutex<Vec<String>>,
        navigated: Mutex<Vec<String>>,
    }

    impl FakeSandbox {
        fn injections(&self) -> Vec<String> {
            self.injected.lock().unwrap().clone()
        }

        fn navigations(&self) -> Vec<String> {
            self.navigated.lock().unwrap().clone()
        }
    }

    impl SandboxHandle for FakeSandbox {
        fn inject(&self, script: &str) {
            self.injected.lock().unwrap().push(script.to_string());
        }

        fn navigate(&self, url: &str) {
            self.navigated.lock().unwrap().push(url.to_string());
        }
    }

    fn controller(flow: FlowConfig) -> FlowController<FakeSandbox, MemoryDocumentStore> {
        let sandbox = Arc::new(FakeSandbox::default());
        let persister = ResultPersister::new(Arc::new(MemoryDocumentStore::new()), "foundUser")
            .with_identity(Identity("tester".to_string()));
        FlowController::new(sandbox, persister, flow, EngineSettings::default())
    }

    const FORM_URL: &str =
        "https://sipp.bpjsketenagakerjaan.go.id/tenaga-kerja/baru/form-tambah-tk-individu";

    #[tokio::test]
    async fn start_navigates_to_the_flow_entry_page() {
        let mut c = controller(FlowConfig::registration_check());
        c.start(vec![CandidateItem::new("2409000123")]);
        assert_eq!(c.session().pending_step, PendingStep::AwaitFormSubmit);
        assert_eq!(c.sandbox.navigations(), vec![FORM_URL.to_string()]);
    }

    #[tokio::test]
    async fn empty_candidate_list_completes_immediately() {
        let mut c = controller(FlowConfig::registration_check());
        let mut events = c.subscribe();
        c.start(vec![]);
        assert_eq!(c.session().pending_step, PendingStep::Idle);
        // SessionStarted then SessionCompleted.
        assert!(matches!(
            events.try_recv().unwrap(),
            AutomationEvent::SessionStarted { .. }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            AutomationEvent::SessionCompleted { .. }
        ));
    }

    #[tokio::test]
    async fn form_navigation_injects_exactly_one_submit_script() {
        let mut c = controller(FlowConfig::registration_check());
        c.start(vec![CandidateItem::new("2409000123")]);
        c.handle_signal(SandboxSignal::NavigationCompleted {
            url: FORM_URL.to_string(),
        })
        .await;
        assert_eq!(c.session().pending_step, PendingStep::AwaitResult);
        // A duplicate delivery of the same navigation changes nothing.
        c.handle_signal(SandboxSignal::NavigationCompleted {
            url: FORM_URL.to_string(),
        })
        .await;
        assert_eq!(c.sandbox.injections().len(), 1);
        assert!(c.sandbox.injections()[0].contains("2409000123"));
    }

    #[tokio::test]
    async fn signals_are_discarded_while_idle() {
        let mut c = controller(FlowConfig::registration_check());
        c.handle_signal(SandboxSignal::NavigationCompleted {
            url: FORM_URL.to_string(),
        })
        .await;
        assert!(c.sandbox.injections().is_empty());
        assert_eq!(c.session().pending_step, PendingStep::Idle);
    }

    #[tokio::test]
    async fn stop_releases_everything() {
        let mut c = controller(FlowConfig::registration_check());
        c.start(vec![CandidateItem::new("2409000123")]);
        c.handle_signal(SandboxSignal::NavigationCompleted {
            url: FORM_URL.to_string(),
        })
        .await;
        c.stop("user cancelled");
        assert_eq!(c.session().pending_step, PendingStep::Idle);
        c.handle_signal(SandboxSignal::Message {
            body: r#"{"type":"process","step":"result","ok":true,"text":"whatever"}"#.to_string(),
        })
        .await;
        assert_eq!(c.session().snapshot().checked, 0);
    }

    #[tokio::test]
    async fn lookup_driven_flow_starts_on_the_registry_page() {
        let mut c = controller(FlowConfig::registry_validation());
        c.start(vec![
            CandidateItem::new("2409000123").with_secondary_id("3173000000000001")
        ]);
        assert_eq!(c.session().pending_step, PendingStep::AwaitSecondaryLookup);
        assert_eq!(
            c.sandbox.navigations(),
            vec!["https://cekdptonline.kpu.go.id/".to_string()]
        );
        c.handle_signal(SandboxSignal::NavigationCompleted {
            url: "https://cekdptonline.kpu.go.id/".to_string(),
        })
        .await;
        let injections = c.sandbox.injections();
        assert_eq!(injections.len(), 1);
        // The lookup submits the secondary id, not the membership number.
        assert!(injections[0].contains("3173000000000001"));
    }
}
