//! `vigil-core`: data model, error taxonomy and configuration shared by every
//! Vigil crate.

pub mod config;
pub mod error;
pub mod taxonomy;
pub mod types;

pub use error::{Result, VigilError};
pub use taxonomy::{ErrorCategory, ErrorCode};
pub use types::{
    CheckStatus, Credential, ExecutionResult, Host, Protocol, Script, SessionId, TaskSpec, Verdict,
};
