//! Engine module - the automation controller proper
//!
//! The engine owns the per-item state machine, the lock and timeout
//! subsystem arbitrating the two uncorrelated sandbox signals, the
//! templated script injector, and the batch loop. Everything here is
//! single-threaded and cooperative: handlers never block and all work is
//! driven by incoming signals.

pub mod bus;
pub mod controller;
pub mod flow;
pub mod injector;
pub mod locks;
pub mod runtime;

pub use bus::{SandboxHandle, SandboxMessage, SandboxSignal};
pub use controller::{EngineSettings, FlowController};
pub use flow::{FlowConfig, PersistMode};
pub use injector::{PollingSpec, ScriptInjector};
pub use locks::{LockAcquire, StepLocks};
pub use runtime::{EngineCommand, EngineHandle, EngineRuntime};
