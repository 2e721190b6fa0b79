//! Loom keeps a key-value store in sync with the overlay addresses Weave
//! assigns to containers on this host.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod probe;
pub mod resolve;
pub mod retry;
pub mod runtime;
pub mod store;
pub mod types;

pub use engine::{Context, Outcome, Reconciler, SyncReport};
pub use error::{Error, Result};
