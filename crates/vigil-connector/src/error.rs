//! Error types for the vigil-connector crate.

use thiserror::Error;

/// All errors that can originate from a remote session.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// TCP connect failed (refused, no route, DNS).
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    /// Session establishment exceeded its time budget.
    #[error("Connect timed out after {ms}ms")]
    ConnectTimeout { ms: u64 },

    /// Handshake or transport failure while opening the session (reset, EOF).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The target rejected the credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// An established session died mid-use.
    #[error("Session lost: {0}")]
    SessionLost(String),

    /// A dispatched call exceeded its wall-clock budget.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The remote endpoint answered with something we cannot interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// `run` or `probe_privilege` was called before a successful `open`.
    #[error("Session is not open")]
    NotConnected,

    /// The worker pool was shut down or a worker panicked.
    #[error("Worker pool error: {0}")]
    Pool(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    /// Failures worth retrying while opening a session. Authentication is
    /// never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::Unreachable(_)
                | ConnectorError::ConnectTimeout { .. }
                | ConnectorError::Transport(_)
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ConnectorError::Auth(_))
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ConnectorError>;
