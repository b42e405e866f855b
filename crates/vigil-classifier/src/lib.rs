//! vigil-classifier: from raw command output to a compliance verdict.
//!
//! [`Classifier::classify`] takes a [`vigil_connector::CommandOutcome`] and
//! the [`vigil_core::Script`] it came from. Without a processor script the
//! exit status decides. With one, the processor runs locally through a
//! [`ProcessorRunner`] and [`resolve_status`] reads its output.

pub mod classifier;
pub mod error;
pub mod extract;
pub mod runner;
pub mod status;
pub mod types;

pub use classifier::Classifier;
pub use error::{ClassifierError, Result};
pub use extract::extract_actual;
pub use runner::{LocalProcessRunner, ProcessorRunner};
pub use status::{resolve_status, STATUS_LINE_PREFIX};
pub use types::{normalize_newlines, ProcessorInput, ProcessorOutput};
