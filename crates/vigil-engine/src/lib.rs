//! vigil-engine: runs check tasks end to end.
//!
//! A run is a list of [`vigil_core::TaskSpec`]s. For each task the
//! [`Orchestrator`] opens one session to the host, passes the preliminary
//! gates, then runs and classifies every script in order, writing exactly one
//! [`vigil_core::ExecutionResult`] per script. Progress is streamed as
//! [`ProgressEvent`]s ending in a `complete` event.

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod store;

pub use error::{EngineError, Result};
pub use events::{ProgressEvent, ProgressSink, Stage};
pub use orchestrator::{Orchestrator, RunHandle, RunSummary};
pub use store::{init_db, InMemoryStore, Inventory, ResultSink, SqliteStore};
