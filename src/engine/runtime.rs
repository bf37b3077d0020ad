//! Runtime actor wrapping a `FlowController`.
//!
//! The controller itself is single-threaded; the runtime gives it a home
//! task and two inboxes (host commands and sandbox signals) plus a
//! cancellation token for teardown. Embedding hosts keep the
//! `EngineHandle` and feed it from their UI thread and the sandbox's
//! callback glue.

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::persister::PersistenceError;
use crate::domain::candidate::CandidateItem;
use crate::domain::events::AutomationEvent;
use crate::infrastructure::store::DocumentStore;

use super::bus::{SandboxHandle, SandboxSignal};
use super::controller::FlowController;

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const SIGNAL_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum EngineCommand {
    /// Start a run over an explicit candidate list.
    Start { candidates: Vec<CandidateItem> },
    /// Start a run over store records still awaiting validation.
    StartPendingValidation,
    Stop { reason: String },
    Shutdown,
}

/// Cloneable handle for feeding the runtime.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    signals: mpsc::Sender<SandboxSignal>,
}

impl EngineHandle {
    pub async fn send_command(&self, command: EngineCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Forward a sandbox signal. Returns false when the runtime is gone
    /// or the inbox is full; dropping a signal is safe (the state machine
    /// recovers through staleness).
    pub fn send_signal(&self, signal: SandboxSignal) -> bool {
        self.signals.try_send(signal).is_ok()
    }
}

pub struct EngineRuntime<S: SandboxHandle, D: DocumentStore> {
    controller: FlowController<S, D>,
    commands: mpsc::Receiver<EngineCommand>,
    signals: mpsc::Receiver<SandboxSignal>,
    cancel: CancellationToken,
}

impl<S: SandboxHandle, D: DocumentStore> EngineRuntime<S, D> {
    pub fn new(
        controller: FlowController<S, D>,
        cancel: CancellationToken,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let runtime = Self {
            controller,
            commands: command_rx,
            signals: signal_rx,
            cancel,
        };
        let handle = EngineHandle {
            commands: command_tx,
            signals: signal_tx,
        };
        (runtime, handle)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.controller.subscribe()
    }

    /// Event loop. Returns when shut down or cancelled.
    pub async fn run(mut self) {
        info!(flow = %self.controller.flow().name, "engine runtime up");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.controller.stop("cancelled");
                    info!("engine runtime cancelled");
                    break;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(EngineCommand::Start { candidates }) => {
                            self.controller.start(candidates);
                        }
                        Some(EngineCommand::StartPendingValidation) => {
                            match self.load_pending().await {
                                Ok(candidates) => self.controller.start(candidates),
                                Err(err) => {
                                    warn!(error = %err, "could not source validation candidates");
                                }
                            }
                        }
                        Some(EngineCommand::Stop { reason }) => {
                            self.controller.stop(&reason);
                        }
                        Some(EngineCommand::Shutdown) | None => {
                            self.controller.stop("shutdown");
                            info!("engine runtime shut down");
                            break;
                        }
                    }
                }
                signal = self.signals.recv() => {
                    match signal {
                        Some(signal) => self.controller.handle_signal(signal).await,
                        None => {
                            self.controller.stop("sandbox detached");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn load_pending(&self) -> Result<Vec<CandidateItem>, PersistenceError> {
        self.controller.persister().pending_validation().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::persister::{Identity, ResultPersister};
    use crate::engine::controller::EngineSettings;
    use crate::engine::flow::FlowConfig;
    use crate::infrastructure::memory_store::MemoryDocumentStore;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct NullSandbox {
        navigations: Mutex<u32>,
    }

    impl SandboxHandle for NullSandbox {
        fn inject(&self, _script: &str) {}
        fn navigate(&self, _url: &str) {
            *self.navigations.lock().unwrap() += 1;
        }
    }

    fn runtime() -> (
        EngineRuntime<NullSandbox, MemoryDocumentStore>,
        EngineHandle,
        CancellationToken,
    ) {
        let controller = FlowController::new(
            Arc::new(NullSandbox::default()),
            ResultPersister::new(Arc::new(MemoryDocumentStore::new()), "foundUser")
                .with_identity(Identity("tester".to_string())),
            FlowConfig::registration_check(),
            EngineSettings::default(),
        );
        let cancel = CancellationToken::new();
        let (runtime, handle) = EngineRuntime::new(controller, cancel.clone());
        (runtime, handle, cancel)
    }

    #[tokio::test]
    async fn shutdown_command_ends_the_loop() {
        let (runtime, handle, _cancel) = runtime();
        let task = tokio::spawn(runtime.run());
        assert!(handle.send_command(EngineCommand::Shutdown).await);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_token_ends_the_loop() {
        let (runtime, _handle, cancel) = runtime();
        let task = tokio::spawn(runtime.run());
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn start_emits_session_started() {
        let (runtime, handle, _cancel) = runtime();
        let mut events = runtime.subscribe();
        let task = tokio::spawn(runtime.run());
        handle
            .send_command(EngineCommand::Start {
                candidates: vec![CandidateItem::new("2409000123")],
            })
            .await;
        match events.recv().await.unwrap() {
            AutomationEvent::SessionStarted { total, .. } => assert_eq!(total, 1),
            other => panic!("unexpected event: {other:?}"),
        }
        handle.send_command(EngineCommand::Shutdown).await;
        task.await.unwrap();
    }
}
