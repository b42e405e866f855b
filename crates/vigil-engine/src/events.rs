//! Live progress stream of one run.
//!
//! Wire: `{ "seq": 3, "session_id": "...", "at": "...", "stage": "check_login",
//! "host_id": "web-01", "success": true, "message": "authenticated" }`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use vigil_connector::{Gate, GateOutcome};
use vigil_core::{CheckStatus, ErrorCode, SessionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Starts at 1 and increases by one per event within a run.
    pub seq: u64,
    pub session_id: SessionId,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub stage: Stage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    Status {
        message: String,
    },
    Info {
        message: String,
    },
    TaskStart {
        task_index: usize,
        total_tasks: usize,
        host_id: String,
        script_count: usize,
    },
    CheckNetwork {
        host_id: String,
        success: bool,
        message: String,
    },
    CheckLogin {
        host_id: String,
        success: bool,
        message: String,
    },
    CheckSudo {
        host_id: String,
        success: bool,
        message: String,
    },
    ScriptProgress {
        host_id: String,
        script_id: String,
        /// 1-based position of the script within its task.
        index: usize,
        total: usize,
        check_status: CheckStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    TaskComplete {
        task_index: usize,
        host_id: String,
    },
    TaskError {
        task_index: usize,
        host_id: String,
        error: String,
    },
    Complete {
        total_tasks: usize,
        /// Number of failed tasks.
        failed: usize,
    },
}

impl Stage {
    pub fn for_gate(host_id: &str, outcome: &GateOutcome) -> Self {
        let host_id = host_id.to_string();
        let success = outcome.ok;
        let message = outcome.message.clone();
        match outcome.gate {
            Gate::Network => Stage::CheckNetwork {
                host_id,
                success,
                message,
            },
            Gate::Login => Stage::CheckLogin {
                host_id,
                success,
                message,
            },
            Gate::Privilege => Stage::CheckSudo {
                host_id,
                success,
                message,
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete { .. })
    }
}

/// Producer half of a run's stream. Stamps sequence numbers.
///
/// Sending never blocks and never fails: a consumer that went away does not
/// stop the run.
pub struct ProgressSink {
    session_id: SessionId,
    seq: u64,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink {
    pub fn channel(session_id: SessionId) -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                session_id,
                seq: 0,
                tx,
            },
            rx,
        )
    }

    pub fn emit(&mut self, stage: Stage) {
        self.seq += 1;
        let event = ProgressEvent {
            seq: self.seq,
            session_id: self.session_id.clone(),
            at: Utc::now(),
            stage,
        };
        let _ = self.tx.send(event);
    }

    pub fn status(&mut self, message: impl Into<String>) {
        self.emit(Stage::Status {
            message: message.into(),
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.emit(Stage::Info {
            message: message.into(),
        });
    }
}
