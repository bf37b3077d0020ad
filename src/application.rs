//! Application services built on the engine and the store.

pub mod persister;

pub use persister::{Identity, PersistenceError, ResultPersister};
