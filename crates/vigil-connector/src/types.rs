//! Shared data types for vigil-connector.

use serde::{Deserialize, Serialize};
use vigil_core::ErrorCode;

/// Raw result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Remote exit status (0 = success, -1 when the protocol reported none).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Whether the logged-in account can act with administrative rights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeProbe {
    pub elevated: bool,
    /// Human-readable evidence (probe output or the reason it failed).
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Preliminary gates
// ---------------------------------------------------------------------------

/// The three checks that must pass before any script runs, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Network,
    Login,
    Privilege,
}

impl Gate {
    pub const ORDER: [Gate; 3] = [Gate::Network, Gate::Login, Gate::Privilege];

    /// Taxonomy code recorded on every script when this gate fails.
    pub fn error_code(self) -> ErrorCode {
        match self {
            Gate::Network => ErrorCode::NetworkUnreachable,
            Gate::Login => ErrorCode::LoginFailed,
            Gate::Privilege => ErrorCode::InsufficientPrivilege,
        }
    }
}

/// Result of a single gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub gate: Gate,
    pub ok: bool,
    pub message: String,
}

impl GateOutcome {
    pub fn pass(gate: Gate, message: impl Into<String>) -> Self {
        Self {
            gate,
            ok: true,
            message: message.into(),
        }
    }

    pub fn fail(gate: Gate, message: impl Into<String>) -> Self {
        Self {
            gate,
            ok: false,
            message: message.into(),
        }
    }
}

/// Outcomes of the gates that actually ran (a failure short-circuits the rest).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub outcomes: Vec<GateOutcome>,
}

impl PreflightReport {
    pub fn passed(&self) -> bool {
        self.outcomes.len() == Gate::ORDER.len() && self.outcomes.iter().all(|o| o.ok)
    }

    pub fn failure(&self) -> Option<&GateOutcome> {
        self.outcomes.iter().find(|o| !o.ok)
    }
}
